use std::io;

pub trait Serialize<'a> {
    /// Writes `self` into `buf`.
    ///
    /// May return a borrowed slice that should be written right after `buf`, this
    /// avoids copying payloads that already live somewhere as bytes.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}
