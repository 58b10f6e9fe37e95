/// Default number of user/assistant pairs kept for context.
pub const DEFAULT_HISTORY_PAIRS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Sliding window over past exchanges, bounded by pair count.
///
/// Exchanges enter and leave in user/assistant pairs, oldest first, so the
/// window never splits a pair or reorders turns.
#[derive(Debug)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
    max_pairs: usize,
}

impl ConversationHistory {
    pub fn new(max_pairs: usize) -> Self {
        ConversationHistory { turns: Vec::new(), max_pairs }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Record one completed exchange, evicting the oldest pairs past the
    /// bound.
    pub fn record(&mut self, prompt: &str, reply: &str) {
        self.turns.push(Turn { role: Role::User, content: prompt.to_string() });
        self.turns.push(Turn { role: Role::Assistant, content: reply.to_string() });

        while self.turns.len() > self.max_pairs * 2 {
            self.turns.drain(..2);
        }
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        ConversationHistory::new(DEFAULT_HISTORY_PAIRS)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn keeps_most_recent_pairs() {
        let mut history = ConversationHistory::new(10);

        for i in 0..11 {
            history.record(&format!("prompt {}", i), &format!("reply {}", i));
        }

        assert_eq!(history.len(), 20);
        assert_eq!(history.turns()[0].content, "prompt 1");
        assert_eq!(history.turns()[0].role, Role::User);
        assert_eq!(history.turns()[19].content, "reply 10");
        assert_eq!(history.turns()[19].role, Role::Assistant);
    }

    #[test]
    fn never_splits_a_pair() {
        let mut history = ConversationHistory::new(3);

        for i in 0..50 {
            history.record(&format!("p{}", i), &format!("r{}", i));
            assert!(history.len() % 2 == 0);
            assert!(history.len() <= 6);
            for (index, turn) in history.turns().iter().enumerate() {
                let expected = if index % 2 == 0 { Role::User } else { Role::Assistant };
                assert_eq!(turn.role, expected);
            }
        }
    }

    #[test]
    fn zero_bound_retains_nothing() {
        let mut history = ConversationHistory::new(0);
        history.record("p", "r");
        assert!(history.is_empty());
    }
}
