use crate::common::phys::PhysLayer;
use crate::decode::PhysDecodeLevel;

/// Reassembly buffer for bytes read from the transport
///
/// Bytes between `begin` and `end` have been read but not yet consumed by the framer.
pub(crate) struct ReadBuffer {
    buffer: Vec<u8>,
    begin: usize,
    end: usize,
}

impl ReadBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        ReadBuffer {
            buffer: vec![0; capacity],
            begin: 0,
            end: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.end - self.begin
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub(crate) fn readable(&self) -> &[u8] {
        &self.buffer[self.begin..self.end]
    }

    pub(crate) fn consume(&mut self, count: usize) {
        self.begin = std::cmp::min(self.begin + count, self.end);
    }

    pub(crate) fn clear(&mut self) {
        self.begin = 0;
        self.end = 0;
    }

    pub(crate) async fn read_some(
        &mut self,
        io: &mut PhysLayer,
        level: PhysDecodeLevel,
    ) -> Result<usize, std::io::Error> {
        self.make_space();

        let dest = &mut self.buffer[self.end..];
        if dest.is_empty() {
            // a frame never exceeds the capacity, so a full buffer means a framing bug
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "reassembly buffer is full",
            ));
        }

        let count = io.read(dest, level).await?;

        if count == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        }
        self.end += count;
        Ok(count)
    }

    fn make_space(&mut self) {
        // an empty buffer can restart at the front, avoiding a later shift
        if self.is_empty() {
            self.begin = 0;
            self.end = 0;
        }

        if self.end == self.buffer.len() && self.begin > 0 {
            let length = self.len();
            self.buffer.copy_within(self.begin..self.end, 0);
            self.begin = 0;
            self.end = length;
        }
    }

    #[cfg(test)]
    pub(crate) fn push(&mut self, bytes: &[u8]) {
        self.make_space();
        self.buffer[self.end..self.end + bytes.len()].copy_from_slice(bytes);
        self.end += bytes.len();
    }
}
