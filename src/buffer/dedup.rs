//! 有界的最近已见 id 集合（至少一次投递渠道的去重）

use std::collections::{HashSet, VecDeque};

/// 只保留最近 capacity 个 id，超出时淘汰最早插入的
#[derive(Debug, Clone)]
pub struct RecentIds {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl RecentIds {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// 记录 id；已存在返回 false
    pub fn insert(&mut self, id: &str) -> bool {
        if self.members.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.members.insert(id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_duplicates() {
        let mut ids = RecentIds::new(10);
        assert!(ids.insert("1"));
        assert!(!ids.insert("1"));
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn test_capacity_keeps_most_recent() {
        let mut ids = RecentIds::new(3);
        for id in ["1", "2", "3", "4"] {
            ids.insert(id);
        }
        assert_eq!(ids.len(), 3);
        assert!(!ids.insert("4"));
        // 被淘汰的 id 会再次被接受
        assert!(ids.insert("1"));
        assert_eq!(ids.len(), 3);
    }
}
