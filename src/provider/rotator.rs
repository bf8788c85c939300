//! 凭证轮换器
//!
//! 持有一组有序的提供方凭证，轮换位置由原子下标维护，
//! 并发调度时 `current()` / `rotate()` 不会计算出不一致的位置。
//! 调度器通过 `current_with_position()` + `rotate_from()` 做条件轮换：
//! 多个调用方在同一凭证上同时失败时，位置只前进一次。

use std::sync::atomic::{AtomicUsize, Ordering};

/// 默认凭证槽位数
pub const DEFAULT_MAX_SLOTS: usize = 5;

/// Round-robin credential pool.
///
/// An empty pool is valid: `current()` and `rotate()` both return `None`.
#[derive(Debug)]
pub struct KeyRotator {
    name: String,
    keys: Vec<String>,
    position: AtomicUsize,
}

impl KeyRotator {
    /// 从给定凭证列表创建，空白凭证会被忽略
    pub fn new<I, S>(name: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = keys
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        Self {
            name: name.to_string(),
            keys,
            position: AtomicUsize::new(0),
        }
    }

    /// 空凭证池
    pub fn empty(name: &str) -> Self {
        Self::new(name, Vec::<String>::new())
    }

    /// 从编号环境变量加载，例如 `GEMINI_API_1` .. `GEMINI_API_5`
    pub fn from_env(prefix: &str, max_slots: usize) -> Self {
        let keys: Vec<String> = (1..=max_slots)
            .filter_map(|i| std::env::var(format!("{}{}", prefix, i)).ok())
            .collect();

        let rotator = Self::new(prefix.trim_end_matches('_'), keys);
        tracing::info!(
            "Loaded {} credential(s) for {} from {}1..{}{}",
            rotator.len(),
            rotator.name,
            prefix,
            prefix,
            max_slots
        );
        rotator
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// 当前位置（已对凭证数取模）
    pub fn position(&self) -> usize {
        if self.keys.is_empty() {
            return 0;
        }
        self.position.load(Ordering::Acquire) % self.keys.len()
    }

    /// 当前激活的凭证
    pub fn current(&self) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }
        self.keys.get(self.position()).map(String::as_str)
    }

    /// 当前位置及其凭证，供 `rotate_from` 使用
    pub fn current_with_position(&self) -> Option<(usize, &str)> {
        let position = self.position();
        self.keys
            .get(position)
            .map(|key| (position, key.as_str()))
    }

    /// 仅当位置仍为 `observed` 时前进一格
    ///
    /// 若其他调用方已经越过该位置则不做任何事，返回此时的当前凭证。
    pub fn rotate_from(&self, observed: usize) -> Option<&str> {
        let len = self.keys.len();
        if len == 0 {
            return None;
        }

        let observed = observed % len;
        match self.position.compare_exchange(
            observed,
            (observed + 1) % len,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => self.keys.get((observed + 1) % len).map(String::as_str),
            Err(_) => self.current(),
        }
    }

    /// 前进到下一个凭证（循环），返回新的当前凭证
    pub fn rotate(&self) -> Option<&str> {
        let len = self.keys.len();
        if len == 0 {
            return None;
        }

        let previous = self
            .position
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| Some((p + 1) % len))
            .unwrap_or_else(|p| p);

        self.keys.get((previous + 1) % len).map(String::as_str)
    }
}

/// 日志中只展示凭证首尾字符
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}
