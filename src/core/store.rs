//! 带容量与空闲过期的 keyed store
//!
//! 用于替代「每个 identity 一项、永不清理」的 HashMap（上下文日志、用户设置等）。
//! 插入新 key 时若已满，先清理过期项，仍满则淘汰最久未访问的一项。

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

struct Entry<V> {
    value: V,
    last_access: Instant,
}

/// 容量 + 空闲过期策略的键值存储（非线程安全，由持有者加锁）
pub struct KeyedStore<K, V> {
    entries: HashMap<K, Entry<V>>,
    capacity: usize,
    idle_ttl: Duration,
}

impl<K, V> KeyedStore<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize, idle_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            idle_ttl,
        }
    }

    /// 取已有值或插入新值，刷新访问时间
    pub fn get_or_insert_with<F>(&mut self, key: &K, make: F) -> &mut V
    where
        F: FnOnce() -> V,
    {
        let now = Instant::now();
        if !self.entries.contains_key(key) {
            if self.entries.len() >= self.capacity {
                self.sweep_expired();
            }
            if self.entries.len() >= self.capacity {
                self.evict_lru();
            }
        }
        let entry = self.entries.entry(key.clone()).or_insert_with(|| Entry {
            value: make(),
            last_access: now,
        });
        entry.last_access = now;
        &mut entry.value
    }

    pub fn get(&mut self, key: &K) -> Option<&mut V> {
        let entry = self.entries.get_mut(key)?;
        entry.last_access = Instant::now();
        Some(&mut entry.value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    /// 清理空闲超过 idle_ttl 的项，返回清理数量
    pub fn sweep_expired(&mut self) -> usize {
        let ttl = self.idle_ttl;
        let before = self.entries.len();
        self.entries.retain(|_, e| e.last_access.elapsed() <= ttl);
        before - self.entries.len()
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone());
        if let Some(k) = oldest {
            self.entries.remove(&k);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
