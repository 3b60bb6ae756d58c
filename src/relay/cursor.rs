/// Last message id relayed by the poll path. Zero means nothing relayed yet.
///
/// Owned by the poll loop alone; the stream path never reads it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    last_message_id: i64,
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_message_id(&self) -> i64 {
        self.last_message_id
    }

    /// Whether a polled id counts as new.
    pub fn admits(&self, id: i64) -> bool {
        id > self.last_message_id
    }

    /// Record `id` as the last relayed message.
    ///
    /// The cursor takes the message's own id, not a running maximum. With
    /// an out-of-order page such as `[5, 3]` it ends at 3, and an id of 4 is
    /// let through on the next cycle. Upstream Max behaves this way and the
    /// relay keeps it.
    pub fn advance(&mut self, id: i64) {
        self.last_message_id = id;
    }
}
