use std::fmt::Display;

use anyhow::Error;

/// Exit the process on errors instead of panicking, printing the error and all of its causes.
pub trait NiceError<T> {
    /// Fail exiting with `1` if the result is an error. Otherwise return the content.
    fn nice_unwrap(self) -> T;

    /// Fail exiting with `1` if the result is an error, printing also the message to stderr.
    /// Otherwise return the content.
    fn nice_expect<S: Display + Send + Sync + 'static>(self, mex: S) -> T;
}

/// Print the error to stderr, followed by its chain of causes.
pub fn print_error(error: &Error) {
    debug!("{:?}", error);
    let mut fail: &dyn std::error::Error = error.as_ref();
    eprintln!("Error: {fail}");
    while let Some(cause) = fail.source() {
        eprintln!("\nCaused by:\n    {cause}");
        fail = cause;
    }
}

impl<T> NiceError<T> for Result<T, Error> {
    fn nice_unwrap(self) -> T {
        match self {
            Ok(x) => x,
            Err(e) => {
                print_error(&e);
                std::process::exit(1);
            }
        }
    }

    fn nice_expect<S: Display + Send + Sync + 'static>(self, mex: S) -> T {
        match self {
            Ok(x) => x,
            Err(e) => {
                print_error(&e.context(mex));
                std::process::exit(1);
            }
        }
    }
}
