//! Byte-equality agreement between peer responses.
//!
//! Responses from the three sockets are compared over a designated slice
//! (typically the 64-byte signature, which is deterministic over the
//! signed payload). The tally starts at 1 for the anchor response and
//! grows for every later response equal to it; `right_offset` survives
//! incremental arrivals so a late third response is compared exactly
//! once against the earlier ones.

/// Incremental agreement over at most three responses.
#[derive(Debug)]
pub struct Agreement {
    responses: Vec<Vec<u8>>,
    status: usize,
    right_offset: usize,
    anchor: usize,
}

impl Default for Agreement {
    fn default() -> Self {
        Self::new()
    }
}

impl Agreement {
    pub fn new() -> Self {
        Self {
            responses: Vec::with_capacity(3),
            status: 1,
            right_offset: 1,
            anchor: 0,
        }
    }

    /// Feed one response slice; returns the updated agreement status.
    pub fn insert(&mut self, response: Vec<u8>) -> usize {
        if self.responses.len() >= 3 {
            return self.status;
        }

        self.responses.push(response);

        while self.right_offset < self.responses.len() {
            if self.responses[self.right_offset] == self.responses[0] {
                self.status += 1;
            }
            self.right_offset += 1;
        }

        // three distinct answers from the anchor's view may still hide an
        // agreeing pair among the later two
        if self.responses.len() == 3 && self.status == 1 && self.responses[2] == self.responses[1] {
            self.status = 2;
            self.anchor = 1;
        }

        self.status
    }

    pub fn status(&self) -> usize {
        self.status
    }

    /// Index of the response the current tally is anchored on.
    pub fn anchor(&self) -> usize {
        self.anchor
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.responses.len() >= 3
    }

    /// Three responses collected and no two of them match.
    pub fn is_contested(&self) -> bool {
        self.is_full() && self.status == 1
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(byte: u8) -> Vec<u8> {
        vec![byte; 64]
    }

    #[test]
    fn unanimous_counts_to_three() {
        let mut agreement = Agreement::new();

        assert_eq!(agreement.insert(sig(1)), 1);
        assert_eq!(agreement.insert(sig(1)), 2);
        assert_eq!(agreement.insert(sig(1)), 3);
        assert_eq!(agreement.anchor(), 0);
    }

    #[test]
    fn any_two_of_three_agree() {
        // anchor pairs
        let mut agreement = Agreement::new();
        agreement.insert(sig(1));
        agreement.insert(sig(1));
        assert_eq!(agreement.insert(sig(2)), 2);

        let mut agreement = Agreement::new();
        agreement.insert(sig(1));
        agreement.insert(sig(2));
        assert_eq!(agreement.insert(sig(1)), 2);

        // the pair the anchor never sees
        let mut agreement = Agreement::new();
        agreement.insert(sig(1));
        agreement.insert(sig(2));
        assert_eq!(agreement.insert(sig(2)), 2);
        assert_eq!(agreement.anchor(), 1);
    }

    #[test]
    fn three_distinct_answers_are_contested() {
        let mut agreement = Agreement::new();
        agreement.insert(sig(1));
        agreement.insert(sig(2));
        agreement.insert(sig(3));

        assert_eq!(agreement.status(), 1);
        assert!(agreement.is_contested());
    }

    #[test]
    fn table_is_capped_at_three() {
        let mut agreement = Agreement::new();
        agreement.insert(sig(1));
        agreement.insert(sig(1));
        agreement.insert(sig(1));

        assert_eq!(agreement.insert(sig(1)), 3);
        assert_eq!(agreement.len(), 3);
    }

    #[test]
    fn reset_clears_the_table() {
        let mut agreement = Agreement::new();
        agreement.insert(sig(1));
        agreement.insert(sig(1));

        agreement.reset();

        assert!(agreement.is_empty());
        assert_eq!(agreement.status(), 1);
    }
}
