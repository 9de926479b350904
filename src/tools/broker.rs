//! 经纪人轮询分配
//!
//! 名册按 ID 排序；当天第一条预约随机选人，之后每条取上一条预约经纪人的下一位（循环）。
//! 上一位经纪人已不在名册中时回到第一位。

use rand::Rng;

use crate::store::Broker;

pub fn assign_broker<R: Rng + ?Sized>(
    roster: &[Broker],
    last_broker_id: Option<&str>,
    rng: &mut R,
) -> Option<Broker> {
    if roster.is_empty() {
        return None;
    }
    let mut sorted: Vec<&Broker> = roster.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let index = match last_broker_id {
        None => rng.gen_range(0..sorted.len()),
        Some(last) => match sorted.iter().position(|b| b.id == last) {
            Some(pos) => (pos + 1) % sorted.len(),
            None => 0,
        },
    };
    sorted.get(index).map(|b| (*b).clone())
}
