use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{SchedulerError, SchedulerResult};

/// 测站代码集合
///
/// 基于 `BTreeSet`, 遍历顺序即字典序, 用于生成确定性的调度分布.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StringSet(BTreeSet<String>);

impl StringSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, item: &str) -> bool {
        self.0.contains(item)
    }

    pub fn insert(&mut self, item: impl Into<String>) -> bool {
        self.0.insert(item.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// 返回唯一的元素, 集合大小不为1时返回错误
    pub fn only(&self) -> SchedulerResult<&str> {
        match self.0.len() {
            1 => self
                .0
                .iter()
                .next()
                .map(String::as_str)
                .ok_or_else(|| SchedulerError::NotSingleton {
                    items: self.to_string(),
                }),
            _ => Err(SchedulerError::NotSingleton {
                items: self.to_string(),
            }),
        }
    }

    /// 按字典序排列的元素
    pub fn sorted(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for StringSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl std::fmt::Display for StringSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined = self.0.iter().cloned().collect::<Vec<_>>().join(",");
        write!(f, "{joined}")
    }
}
