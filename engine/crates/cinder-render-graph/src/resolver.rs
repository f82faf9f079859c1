//! 资源状态推导
//!
//! 按 pass 的顺序遍历每个资源的用法，得到每个 pass 中资源"从什么用法转换到什么用法"。
//! 一帧结束时资源的用法会成为下一帧第一次使用前的用法，因此首次使用的 initial 被替换为最后一次使用的 final。

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;

use crate::{resource::RgResourceKey, usage::RgUsage};

/// 一个资源在一个 pass 中的用法转换
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RgTransition {
    pub initial_usage: RgUsage,
    pub final_usage: RgUsage,
}

impl RgTransition {
    #[inline]
    pub fn new(initial_usage: RgUsage, final_usage: RgUsage) -> Self {
        Self {
            initial_usage,
            final_usage,
        }
    }
}

/// 一个资源在整张图中的用法
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgResourceUsageInfo {
    /// 所有 pass 中用法的并集，用于决定资源创建时的 usage flags
    pub total_usages: RgUsage,
    pub first_pass: usize,
    pub last_pass: usize,
    /// pass index -> 转换
    pub transitions: BTreeMap<usize, RgTransition>,
}

/// 一个 pass 对所有资源的用法，同一资源只出现一次
pub type RgPassUsages = IndexMap<RgResourceKey, RgUsage>;

#[derive(Clone, Debug, Default)]
pub struct RgTransitionTable {
    resources: IndexMap<RgResourceKey, RgResourceUsageInfo>,
    /// 每个 pass 使用的资源，保持声明顺序
    pass_resources: Vec<Vec<RgResourceKey>>,
}

impl RgTransitionTable {
    /// 输入是按执行顺序排列的每个 pass 的用法
    pub fn resolve(passes: &[RgPassUsages]) -> Self {
        let mut resources: IndexMap<RgResourceKey, RgResourceUsageInfo> = IndexMap::new();
        let mut last_usage: HashMap<RgResourceKey, RgUsage> = HashMap::new();
        let mut pass_resources = Vec::with_capacity(passes.len());

        for (pass_index, usages) in passes.iter().enumerate() {
            let mut keys = Vec::with_capacity(usages.len());
            for (key, usage) in usages {
                if usage.is_unknown() {
                    continue;
                }
                let info = resources.entry(key.clone()).or_insert_with(|| RgResourceUsageInfo {
                    total_usages: RgUsage::UNKNOWN,
                    first_pass: pass_index,
                    last_pass: pass_index,
                    transitions: BTreeMap::new(),
                });
                let last = last_usage.entry(key.clone()).or_insert(RgUsage::UNKNOWN);
                info.transitions.insert(pass_index, RgTransition::new(*last, *usage));
                info.total_usages |= *usage;
                info.last_pass = pass_index;
                *last = *usage;
                keys.push(key.clone());
            }
            pass_resources.push(keys);
        }

        // 闭环：第一次使用之前的状态就是上一帧最后一次使用之后的状态
        for (key, info) in resources.iter_mut() {
            let end_usage = last_usage.get(key).copied().unwrap_or_default();
            if let Some(first) = info.transitions.get_mut(&info.first_pass) {
                first.initial_usage = end_usage;
            }
        }

        Self {
            resources,
            pass_resources,
        }
    }

    #[inline]
    pub fn get(&self, key: &RgResourceKey) -> Option<&RgResourceUsageInfo> {
        self.resources.get(key)
    }

    #[inline]
    pub fn transition(&self, key: &RgResourceKey, pass_index: usize) -> Option<RgTransition> {
        self.resources.get(key).and_then(|info| info.transitions.get(&pass_index).copied())
    }

    /// 某个 pass 中所有资源的转换，按声明顺序
    pub fn pass_transitions(&self, pass_index: usize) -> Vec<(&RgResourceKey, RgTransition)> {
        let Some(keys) = self.pass_resources.get(pass_index) else {
            return vec![];
        };
        keys.iter().filter_map(|key| self.transition(key, pass_index).map(|transition| (key, transition))).collect()
    }

    /// 每一帧开始之前资源所处的用法，也是每一帧结束之后的用法
    #[inline]
    pub fn loop_usage(&self, key: &RgResourceKey) -> Option<RgUsage> {
        let info = self.resources.get(key)?;
        info.transitions.get(&info.last_pass).map(|transition| transition.final_usage)
    }

    /// 呈现前后 output attachment 的用法：initial 为最后一个 pass 留下的用法，final 为第一个 pass 期望的用法
    pub fn output_final_transition(&self, key: &RgResourceKey) -> Option<RgTransition> {
        let info = self.resources.get(key)?;
        let last = info.transitions.get(&info.last_pass)?;
        let first = info.transitions.get(&info.first_pass)?;
        Some(RgTransition::new(last.final_usage, first.initial_usage))
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (&RgResourceKey, &RgResourceUsageInfo)> {
        self.resources.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.pass_resources.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> RgResourceKey {
        RgResourceKey::Named(name.to_string())
    }

    fn pass(usages: &[(&str, RgUsage)]) -> RgPassUsages {
        let mut map = RgPassUsages::new();
        for (name, usage) in usages {
            *map.entry(key(name)).or_default() |= *usage;
        }
        map
    }

    #[test]
    fn test_two_pass_chain_and_loop_closure() {
        let table = RgTransitionTable::resolve(&[
            pass(&[("color", RgUsage::COLOR_ATTACHMENT)]),
            pass(&[("color", RgUsage::SAMPLED_IMAGE), ("final", RgUsage::COLOR_ATTACHMENT)]),
        ]);

        let color = key("color");
        assert_eq!(
            table.transition(&color, 0),
            Some(RgTransition::new(RgUsage::SAMPLED_IMAGE, RgUsage::COLOR_ATTACHMENT))
        );
        assert_eq!(
            table.transition(&color, 1),
            Some(RgTransition::new(RgUsage::COLOR_ATTACHMENT, RgUsage::SAMPLED_IMAGE))
        );
        assert_eq!(table.get(&color).unwrap().total_usages, RgUsage::COLOR_ATTACHMENT | RgUsage::SAMPLED_IMAGE);

        // 只被使用一次的资源：闭环后 initial == final
        let single = table.transition(&key("final"), 1).unwrap();
        assert_eq!(single.initial_usage, single.final_usage);
    }

    #[test]
    fn test_chain_property() {
        let table = RgTransitionTable::resolve(&[
            pass(&[("a", RgUsage::TRANSFER_DST)]),
            pass(&[("b", RgUsage::STORAGE_BUFFER)]),
            pass(&[("a", RgUsage::STORAGE_IMAGE)]),
            pass(&[("a", RgUsage::SAMPLED_IMAGE), ("b", RgUsage::UNIFORM_BUFFER)]),
        ]);

        for (_, info) in table.iter() {
            let transitions = info.transitions.values().collect::<Vec<_>>();
            for pair in transitions.windows(2) {
                assert_eq!(pair[0].final_usage, pair[1].initial_usage);
            }
            let first = info.transitions[&info.first_pass];
            let last = info.transitions[&info.last_pass];
            assert_eq!(first.initial_usage, last.final_usage);
        }
        assert_eq!(table.get(&key("a")).unwrap().first_pass, 0);
        assert_eq!(table.get(&key("a")).unwrap().last_pass, 3);
        assert_eq!(table.pass_transitions(1).len(), 1);
    }

    #[test]
    fn test_usages_in_one_pass_are_merged() {
        let table = RgTransitionTable::resolve(&[pass(&[
            ("img", RgUsage::SAMPLED_IMAGE),
            ("img", RgUsage::COLOR_ATTACHMENT),
        ])]);
        let transition = table.transition(&key("img"), 0).unwrap();
        assert_eq!(transition.final_usage, RgUsage::SAMPLED_IMAGE | RgUsage::COLOR_ATTACHMENT);
        assert_eq!(table.pass_transitions(0).len(), 1);
    }

    #[test]
    fn test_output_final_transition() {
        let table = RgTransitionTable::resolve(&[
            pass(&[("out", RgUsage::COLOR_ATTACHMENT)]),
            pass(&[("out", RgUsage::SAMPLED_IMAGE)]),
        ]);
        let out = key("out");
        let transition = table.output_final_transition(&out).unwrap();
        assert_eq!(transition.initial_usage, RgUsage::SAMPLED_IMAGE);
        assert_eq!(transition.final_usage, RgUsage::SAMPLED_IMAGE);
        assert_eq!(table.loop_usage(&out), Some(RgUsage::SAMPLED_IMAGE));
        assert_eq!(table.output_final_transition(&key("missing")), None);
    }

    #[test]
    fn test_unknown_usage_is_ignored() {
        let table = RgTransitionTable::resolve(&[pass(&[("sampler_only", RgUsage::UNKNOWN)])]);
        assert!(table.is_empty());
        assert_eq!(table.pass_count(), 1);
    }
}
