use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_CONFIRM_WINDOW: Duration = Duration::from_millis(1000);

/// Outcome of pressing a throttled action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// First press: the key is armed and the caller should show a confirmation notice.
    Armed,
    /// Second press inside the window: run the action.
    Confirmed,
}

/// Two-press confirmation for destructive actions, keyed by an identifier such as
/// `"delete-post"` or the id of the comment about to be removed.
#[derive(Debug)]
pub struct ActionThrottle {
    window: Duration,
    armed: HashMap<String, Instant>,
}

impl Default for ActionThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRM_WINDOW)
    }
}

impl ActionThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            armed: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn press(&mut self, key: &str, now: Instant) -> Confirmation {
        if let Some(armed_at) = self.armed.remove(key) {
            if now.saturating_duration_since(armed_at) < self.window {
                log::debug!("throttle: {key} confirmed");
                return Confirmation::Confirmed;
            }
        }
        log::debug!("throttle: {key} armed");
        self.armed.insert(key.to_string(), now);
        Confirmation::Armed
    }

    pub fn is_armed(&self, key: &str, now: Instant) -> bool {
        self.armed
            .get(key)
            .is_some_and(|at| now.saturating_duration_since(*at) < self.window)
    }

    pub fn disarm(&mut self, key: &str) {
        self.armed.remove(key);
    }

    pub fn clear(&mut self) {
        self.armed.clear();
    }
}

#[derive(Debug, Clone, Copy)]
struct KeyPress {
    last: Instant,
    count: u32,
}

/// Rolling per-key press counter for keyboard shortcuts.
#[derive(Debug)]
pub struct KeyPressTracker {
    reset_after: Duration,
    keys: HashMap<char, KeyPress>,
}

impl Default for KeyPressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRM_WINDOW)
    }
}

impl KeyPressTracker {
    pub fn new(reset_after: Duration) -> Self {
        Self {
            reset_after,
            keys: HashMap::new(),
        }
    }

    /// Records a press and returns the running count for the key. Presses while a text
    /// input has focus are ignored entirely and return `None`.
    pub fn press(&mut self, key: char, now: Instant, input_focused: bool) -> Option<u32> {
        if input_focused {
            return None;
        }
        let key = key.to_ascii_lowercase();
        let entry = self.keys.entry(key).or_insert(KeyPress {
            last: now,
            count: 0,
        });
        if now.saturating_duration_since(entry.last) > self.reset_after {
            entry.count = 0;
        }
        entry.count += 1;
        entry.last = now;
        Some(entry.count)
    }

    pub fn reset(&mut self, key: char) {
        self.keys.remove(&key.to_ascii_lowercase());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn first_press_arms_second_confirms() {
        let start = Instant::now();
        let mut throttle = ActionThrottle::default();
        assert_eq!(throttle.press("delete", start), Confirmation::Armed);
        assert!(throttle.is_armed("delete", start + ms(10)));
        assert_eq!(throttle.press("delete", start + ms(999)), Confirmation::Confirmed);
        assert!(!throttle.is_armed("delete", start + ms(999)));
    }

    #[test]
    fn press_after_window_rearms() {
        let start = Instant::now();
        let mut throttle = ActionThrottle::default();
        throttle.press("delete", start);
        assert_eq!(throttle.press("delete", start + ms(1000)), Confirmation::Armed);
        assert_eq!(throttle.press("delete", start + ms(1500)), Confirmation::Confirmed);
    }

    #[test]
    fn keys_are_independent() {
        let start = Instant::now();
        let mut throttle = ActionThrottle::default();
        throttle.press("comment-1", start);
        assert_eq!(throttle.press("comment-2", start), Confirmation::Armed);
        assert_eq!(throttle.press("comment-1", start + ms(5)), Confirmation::Confirmed);
    }

    #[test]
    fn key_counter_resets_after_idle_gap() {
        let start = Instant::now();
        let mut keys = KeyPressTracker::default();
        assert_eq!(keys.press('d', start, false), Some(1));
        assert_eq!(keys.press('D', start + ms(400), false), Some(2));
        assert_eq!(keys.press('d', start + ms(1500), false), Some(1));
        keys.reset('d');
        assert_eq!(keys.press('d', start + ms(1600), false), Some(1));
    }

    #[test]
    fn focused_input_suppresses_shortcuts() {
        let start = Instant::now();
        let mut keys = KeyPressTracker::default();
        assert_eq!(keys.press('d', start, true), None);
        assert_eq!(keys.press('d', start, false), Some(1));
    }
}
