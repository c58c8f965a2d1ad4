//! Input channel wrapper
//!
//! Errors raised by the caller's input channel travel up through the zstd
//! decoder and the cipher unchanged, so at the top they look exactly like
//! decoder failures. [`ChannelReader`] tags them on the way in so the
//! reader can report them as I/O errors rather than as a malformed archive.

use std::error::Error;
use std::fmt;
use std::io::{self, Read};

#[derive(Debug)]
struct ChannelError(io::Error);

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Error for ChannelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.0)
    }
}

/// Reader that tags every error from the wrapped channel
pub(crate) struct ChannelReader<R: Read> {
    inner: R,
}

impl<R: Read> ChannelReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read> Read for ChannelReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner
            .read(buf)
            .map_err(|e| io::Error::new(e.kind(), ChannelError(e)))
    }
}

/// Split a tagged channel error from everything else
///
/// Returns `Ok` with the channel's original error, or `Err` with `err`
/// untouched if it did not come from the channel.
pub(crate) fn take_channel_error(err: io::Error) -> Result<io::Error, io::Error> {
    let tagged = err
        .get_ref()
        .map_or(false, |inner| inner.is::<ChannelError>());
    if !tagged {
        return Err(err);
    }
    match err.into_inner().map(|inner| inner.downcast::<ChannelError>()) {
        Some(Ok(channel)) => Ok(channel.0),
        Some(Err(other)) => Err(io::Error::new(io::ErrorKind::Other, other)),
        None => Err(io::Error::new(io::ErrorKind::Other, "untagged channel error")),
    }
}

/// Strip the channel tag, if any
pub(crate) fn untag(err: io::Error) -> io::Error {
    match take_channel_error(err) {
        Ok(original) | Err(original) => original,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "pipe closed"))
        }
    }

    #[test]
    fn test_channel_error_is_tagged() {
        let mut reader = ChannelReader::new(Broken);
        let err = reader.read(&mut [0u8; 4]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);

        let original = take_channel_error(err).unwrap();
        assert_eq!(original.to_string(), "pipe closed");
    }

    #[test]
    fn test_other_errors_pass_through() {
        let err = io::Error::new(io::ErrorKind::Other, "Unknown frame descriptor");
        let err = take_channel_error(err).unwrap_err();
        assert_eq!(err.to_string(), "Unknown frame descriptor");

        let err = io::Error::new(io::ErrorKind::UnexpectedEof, "short");
        assert_eq!(untag(err).kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_data_passes_through() {
        let mut reader = ChannelReader::new(&b"abc"[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
    }
}
