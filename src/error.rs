use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// This enum covers the failure modes of parsing a loaded PE image and of the file-backed
/// operations the crate performs. Each variant provides specific context about the failure
/// mode to enable appropriate error handling.
///
/// Note that handle-level queries on [`crate::Module`] do not surface these errors: per the
/// sentinel contract of that type, an invalid or unparseable module yields empty/`None`/zero
/// results. The `Error` type is what the underlying [`crate::Image`] constructors and the
/// byte-level readers report.
///
/// # Examples
///
/// ```rust
/// use modscope::{Error, Image};
///
/// match Image::from_memory(vec![0x4D, 0x5A]) {
///     Ok(image) => println!("parsed image of {} bytes", image.len()),
///     Err(Error::OutOfBounds) => eprintln!("truncated image"),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("malformed image: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The image is damaged and could not be parsed.
    ///
    /// This error indicates that the image structure is corrupted or doesn't conform to the
    /// PE/COFF layout: a bad DOS magic, an `e_lfanew` pointing outside the probed range, a
    /// declared image size that does not cover the headers. The error includes the source
    /// location where the malformation was detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while reading the image.
    ///
    /// This error occurs when trying to read data beyond the end of the backing buffer or
    /// mapping. It's a safety check to prevent the unchecked offset-chasing the original
    /// layout invites.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// This image type is not supported.
    ///
    /// Indicates that the optional header magic is neither PE32 (0x10B) nor PE32+ (0x20B).
    #[error("This image type is not supported")]
    NotSupported,

    /// Provided input was empty.
    ///
    /// This error occurs when an empty buffer or a null base address is provided where a
    /// mapped image was expected.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    ///
    /// Wraps standard I/O errors that can occur while opening or mapping the backing file
    /// of a module.
    #[error("{0}")]
    FileError(#[from] std::io::Error),
}
