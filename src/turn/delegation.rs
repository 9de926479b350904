//! 智能体委派
//!
//! 每回合一次性决定：主智能体（第一个启用的 primary，否则第一个启用的）默认处理；
//! 消息命中某个次级智能体的触发关键词时交给它，按列表顺序先命中者优先。

use crate::intent::{contains_word, fold};
use crate::store::AgentProfile;

pub fn select_agent<'a>(agents: &'a [AgentProfile], message: &str) -> Option<&'a AgentProfile> {
    let enabled = || agents.iter().filter(|a| a.enabled);
    let primary = enabled().find(|a| a.is_primary).or_else(|| enabled().next())?;

    let folded = fold(message);
    let delegate = enabled()
        .filter(|a| !a.is_primary && a.id != primary.id)
        .find(|a| {
            a.trigger_keywords
                .iter()
                .map(|k| fold(k.trim()))
                .any(|k| !k.is_empty() && contains_word(&folded, &k))
        });
    Some(delegate.unwrap_or(primary))
}
