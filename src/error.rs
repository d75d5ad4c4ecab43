use crate::Status;

/// Alias for the result type used throughout the parser. The error side
/// carries flow-control statuses (`NeedMore`, `Suspend`, ...) as well as
/// hard failures, so `?` doubles as the state-machine exit path.
pub type Result<T> = std::result::Result<T, Status>;

impl From<std::io::Error> for Status {
    fn from(_: std::io::Error) -> Self {
        Status::Error
    }
}

impl<E> From<nom::Err<E>> for Status {
    fn from(_: nom::Err<E>) -> Self {
        Status::Error
    }
}
