pub mod error;
pub mod result;

pub trait WithMsg<S: Into<String>> {
    fn with_msg(self, msg: S) -> Self;
}
