use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("User id is empty")]
    EmptyUserId,

    #[error("User id too long: {0} bytes")]
    UserIdTooLong(usize),

    #[error("User id contains control characters")]
    InvalidUserId,
}
