use std::{error::Error, fmt};

use backtrace::Backtrace;

#[derive(Debug)]
pub struct DbError {
    details: String,
}

impl DbError {
    pub(crate) fn new(msg: &str) -> DbError {
        let bt = Backtrace::new();
        let details = format!("msg: [{}]\nerror backtrace:\n{:?}", msg, bt);
        DbError { details }
    }

    pub fn show_backtrace(&self) {
        println!("{}", self.details);
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.details)
    }
}

impl Error for DbError {
    fn description(&self) -> &str {
        &self.details
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error() {
        let err = DbError::new("test error");
        err.show_backtrace();
    }
}
