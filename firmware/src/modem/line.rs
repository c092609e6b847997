use core::str;

use heapless::Vec;

use super::MAX_LINE_LEN;

/// Reassembles CR/LF terminated lines from the UART byte stream.
///
/// Bytes beyond [`MAX_LINE_LEN`] are dropped; the truncated line is still
/// delivered so the tag of a long payload can be classified.
pub struct LineAssembler {
    buffer: Vec<u8, MAX_LINE_LEN>,
    complete: bool,
}

impl LineAssembler {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            complete: false,
        }
    }

    /// Feeds one byte. Returns the finished line when `byte` terminates it.
    pub fn push(&mut self, byte: u8) -> Option<&str> {
        if self.complete {
            self.buffer.clear();
            self.complete = false;
        }

        match byte {
            b'\n' => {
                self.complete = true;
                Some(valid_prefix(&self.buffer))
            }
            b'\r' => None,
            value => {
                // Full buffer: keep the head of the line.
                let _ = self.buffer.push(value);
                None
            }
        }
    }
}

fn valid_prefix(bytes: &[u8]) -> &str {
    match str::from_utf8(bytes) {
        Ok(line) => line,
        Err(err) => str::from_utf8(&bytes[..err.valid_up_to()]).unwrap_or_default(),
    }
}
