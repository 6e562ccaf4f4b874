// =============================================================================
// Subscription Planner — per-group state machine and topic diff
// =============================================================================
//
//   Unsubscribed --apply(non-empty)--> Pending --ready--> Active
//        ^                                |                  |
//        +---------- closed / teardown ---+------------------+
//
// The planner is synchronous and performs no I/O: it turns a settled desired
// state into channel intents, and the group task executes them.  Diffs are
// taken over topic strings, which for candle topics embed the interval, so an
// interval change unsubscribes every old candle topic.
// =============================================================================

use std::collections::BTreeSet;

use serde::Serialize;

use crate::market_data::StreamKind;
use crate::types::{Instrument, KlineInterval};

/// What the user wants to watch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DesiredState {
    pub instruments: BTreeSet<Instrument>,
    pub interval: KlineInterval,
}

impl DesiredState {
    pub fn new(instruments: impl IntoIterator<Item = Instrument>, interval: KlineInterval) -> Self {
        Self {
            instruments: instruments.into_iter().collect(),
            interval,
        }
    }

    pub fn is_watched(&self, instrument: &Instrument) -> bool {
        self.instruments.contains(instrument)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GroupState {
    Unsubscribed,
    /// Channel requested, waiting for its ready signal.
    Pending,
    Active,
}

/// Side effect the group task must perform on its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelIntent {
    Open,
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Close,
}

pub struct SubscriptionPlanner {
    kind: StreamKind,
    state: GroupState,
    previous_active: BTreeSet<String>,
    close_when_empty: bool,
}

impl SubscriptionPlanner {
    pub fn new(kind: StreamKind, close_when_empty: bool) -> Self {
        Self {
            kind,
            state: GroupState::Unsubscribed,
            previous_active: BTreeSet::new(),
            close_when_empty,
        }
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    pub fn active_topics(&self) -> &BTreeSet<String> {
        &self.previous_active
    }

    pub fn topics_for(&self, desired: &DesiredState) -> BTreeSet<String> {
        desired
            .instruments
            .iter()
            .map(|inst| self.kind.topic(inst, desired.interval))
            .collect()
    }

    /// Apply a settled desired state.
    pub fn apply(&mut self, desired: &DesiredState) -> Vec<ChannelIntent> {
        let desired_topics = self.topics_for(desired);

        if desired_topics.is_empty() {
            if self.close_when_empty {
                return self.teardown();
            }
            return Vec::new();
        }

        match self.state {
            GroupState::Unsubscribed => {
                self.state = GroupState::Pending;
                self.previous_active = desired_topics;
                vec![ChannelIntent::Open]
            }
            GroupState::Pending => {
                // The ready handler subscribes whatever is current by then.
                self.previous_active = desired_topics;
                Vec::new()
            }
            GroupState::Active => {
                if desired_topics == self.previous_active {
                    return Vec::new();
                }
                let to_unsubscribe: Vec<String> = self
                    .previous_active
                    .difference(&desired_topics)
                    .cloned()
                    .collect();

                let mut intents = Vec::with_capacity(2);
                if !to_unsubscribe.is_empty() {
                    intents.push(ChannelIntent::Unsubscribe(to_unsubscribe));
                }
                intents.push(ChannelIntent::Subscribe(
                    desired_topics.iter().cloned().collect(),
                ));
                self.previous_active = desired_topics;
                intents
            }
        }
    }

    /// The channel opened by a previous `Open` intent is ready.
    pub fn on_ready(&mut self) -> Vec<ChannelIntent> {
        if self.state != GroupState::Pending {
            return Vec::new();
        }
        self.state = GroupState::Active;
        if self.previous_active.is_empty() {
            return Vec::new();
        }
        vec![ChannelIntent::Subscribe(
            self.previous_active.iter().cloned().collect(),
        )]
    }

    /// The channel went away without being asked to.
    pub fn on_closed(&mut self) {
        self.state = GroupState::Unsubscribed;
        self.previous_active.clear();
    }

    /// Owning scope ended: close whatever is open.
    pub fn teardown(&mut self) -> Vec<ChannelIntent> {
        let had_channel = self.state != GroupState::Unsubscribed;
        self.on_closed();
        if had_channel {
            vec![ChannelIntent::Close]
        } else {
            Vec::new()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn desired(symbols: &[&str], interval: KlineInterval) -> DesiredState {
        DesiredState::new(symbols.iter().map(|s| Instrument::new(s)), interval)
    }

    fn trade_topic(s: &str) -> String {
        format!("spot@public.deals.v3.api@{s}")
    }

    fn candle_topic(s: &str, iv: &str) -> String {
        format!("spot@public.kline.v3.api@{s}@{iv}")
    }

    fn active_trade_planner(symbols: &[&str]) -> SubscriptionPlanner {
        let mut p = SubscriptionPlanner::new(StreamKind::Trade, false);
        assert_eq!(p.apply(&desired(symbols, KlineInterval::Min15)), vec![ChannelIntent::Open]);
        p.on_ready();
        assert_eq!(p.state(), GroupState::Active);
        p
    }

    #[test]
    fn first_apply_opens_then_subscribes_full_set_on_ready() {
        let mut p = SubscriptionPlanner::new(StreamKind::Trade, false);
        let intents = p.apply(&desired(&["BTCUSDT", "ETHUSDT"], KlineInterval::Min15));
        assert_eq!(intents, vec![ChannelIntent::Open]);
        assert_eq!(p.state(), GroupState::Pending);

        let intents = p.on_ready();
        assert_eq!(
            intents,
            vec![ChannelIntent::Subscribe(vec![
                trade_topic("BTCUSDT"),
                trade_topic("ETHUSDT"),
            ])]
        );
        assert_eq!(p.state(), GroupState::Active);
    }

    #[test]
    fn swap_resubscribes_full_new_set() {
        let mut p = active_trade_planner(&["A", "B"]);
        let intents = p.apply(&desired(&["B", "C"], KlineInterval::Min15));
        assert_eq!(
            intents,
            vec![
                ChannelIntent::Unsubscribe(vec![trade_topic("A")]),
                ChannelIntent::Subscribe(vec![trade_topic("B"), trade_topic("C")]),
            ]
        );
        let expected: BTreeSet<String> = [trade_topic("B"), trade_topic("C")].into();
        assert_eq!(p.active_topics(), &expected);
    }

    #[test]
    fn pure_addition_sends_no_unsubscribe() {
        let mut p = active_trade_planner(&["A"]);
        let intents = p.apply(&desired(&["A", "B"], KlineInterval::Min15));
        assert_eq!(
            intents,
            vec![ChannelIntent::Subscribe(vec![trade_topic("A"), trade_topic("B")])]
        );
    }

    #[test]
    fn unchanged_topics_send_nothing() {
        let mut p = active_trade_planner(&["A"]);
        // Trade topics do not embed the interval.
        assert!(p.apply(&desired(&["A"], KlineInterval::Hour1)).is_empty());
    }

    #[test]
    fn interval_change_replaces_every_candle_topic() {
        let mut p = SubscriptionPlanner::new(StreamKind::Candle, false);
        p.apply(&desired(&["A", "B"], KlineInterval::Min15));
        p.on_ready();

        let intents = p.apply(&desired(&["A", "B"], KlineInterval::Hour1));
        assert_eq!(
            intents,
            vec![
                ChannelIntent::Unsubscribe(vec![
                    candle_topic("A", "Min15"),
                    candle_topic("B", "Min15"),
                ]),
                ChannelIntent::Subscribe(vec![
                    candle_topic("A", "Hour1"),
                    candle_topic("B", "Hour1"),
                ]),
            ]
        );
    }

    #[test]
    fn pending_group_subscribes_latest_set_on_ready() {
        let mut p = SubscriptionPlanner::new(StreamKind::Trade, false);
        p.apply(&desired(&["A"], KlineInterval::Min15));
        assert!(p.apply(&desired(&["B"], KlineInterval::Min15)).is_empty());
        assert_eq!(p.on_ready(), vec![ChannelIntent::Subscribe(vec![trade_topic("B")])]);
    }

    #[test]
    fn empty_set_takes_no_action_by_default() {
        let mut p = active_trade_planner(&["A"]);
        assert!(p.apply(&DesiredState::default()).is_empty());
        assert_eq!(p.state(), GroupState::Active);

        let mut idle = SubscriptionPlanner::new(StreamKind::Trade, false);
        assert!(idle.apply(&DesiredState::default()).is_empty());
        assert_eq!(idle.state(), GroupState::Unsubscribed);
    }

    #[test]
    fn empty_set_closes_when_configured() {
        let mut p = SubscriptionPlanner::new(StreamKind::Trade, true);
        p.apply(&desired(&["A"], KlineInterval::Min15));
        p.on_ready();
        assert_eq!(p.apply(&DesiredState::default()), vec![ChannelIntent::Close]);
        assert_eq!(p.state(), GroupState::Unsubscribed);
        assert!(p.active_topics().is_empty());
    }

    #[test]
    fn closed_channel_reopens_on_next_apply() {
        let mut p = active_trade_planner(&["A"]);
        p.on_closed();
        assert_eq!(p.state(), GroupState::Unsubscribed);
        assert_eq!(p.apply(&desired(&["A"], KlineInterval::Min15)), vec![ChannelIntent::Open]);
    }

    #[test]
    fn teardown_closes_once() {
        let mut p = active_trade_planner(&["A"]);
        assert_eq!(p.teardown(), vec![ChannelIntent::Close]);
        assert!(p.teardown().is_empty());
    }

    #[test]
    fn ready_outside_pending_is_ignored() {
        let mut p = SubscriptionPlanner::new(StreamKind::Trade, false);
        assert!(p.on_ready().is_empty());
        assert_eq!(p.state(), GroupState::Unsubscribed);
    }
}
