use std::collections::HashMap;

use crate::data::Gateway;
use crate::error::{FeedError, FeedResult};
use crate::model::{Direction, Post, Vote};
use crate::session::{usable_token, CredentialProvider};

/// Tri-state toggle: tapping the direction already held clears it,
/// anything else switches to the tapped direction. Returns the new vote
/// and the score delta it implies.
pub fn toggle(current: Vote, tapped: Direction) -> (Vote, i64) {
    let next = match (current, tapped) {
        (Vote::Up, Direction::Up) | (Vote::Down, Direction::Down) => Vote::None,
        (_, Direction::Up) => Vote::Up,
        (_, Direction::Down) => Vote::Down,
    };
    (next, next.value() - current.value())
}

/// Identifies one optimistic vote submission.
pub type Ticket = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingVote {
    pub post_id: String,
    pub submitted: Vote,
}

/// What happened to a post after a submission finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    Confirmed,
    /// The post was put back to its last confirmed state.
    RolledBack { post_id: String },
    /// A later tap on the same post is still pending, so this failure
    /// leaves the post as it is.
    Superseded { post_id: String },
    Unknown,
}

/// Last server-acknowledged state of a post with taps in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Baseline {
    score: i64,
    vote: Vote,
    outstanding: usize,
}

/// Optimistic vote bookkeeping: which submissions are outstanding and what
/// each post looked like when the server last agreed with it.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    next_ticket: Ticket,
    pending: HashMap<Ticket, PendingVote>,
    latest: HashMap<String, Ticket>,
    baselines: HashMap<String, Baseline>,
}

impl Reconciler {
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Applies a tap to `post` immediately and returns the ticket and the
    /// vote to submit.
    pub fn tap(&mut self, post: &mut Post, tapped: Direction) -> (Ticket, Vote) {
        let baseline = self
            .baselines
            .entry(post.id.clone())
            .or_insert_with(|| Baseline {
                score: post.score(),
                vote: post.vote(),
                outstanding: 0,
            });
        baseline.outstanding += 1;

        let (next, _) = toggle(post.vote(), tapped);
        post.set_vote(next);

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        self.pending.insert(
            ticket,
            PendingVote {
                post_id: post.id.clone(),
                submitted: next,
            },
        );
        self.latest.insert(post.id.clone(), ticket);
        (ticket, next)
    }

    /// Settles a submission against `posts`. A confirmation moves the
    /// post's baseline to the submitted vote. Once no later tap on the post
    /// is in flight, the post is put back on its baseline, so a rejected
    /// vote never stays on screen.
    pub fn settle(&mut self, ticket: Ticket, ok: bool, posts: &mut [Post]) -> Settled {
        let Some(pending) = self.pending.remove(&ticket) else {
            return Settled::Unknown;
        };
        if self.latest.get(&pending.post_id) == Some(&ticket) {
            self.latest.remove(&pending.post_id);
        }
        let later_in_flight = self.latest.contains_key(&pending.post_id);

        let Some(baseline) = self.baselines.get_mut(&pending.post_id) else {
            return Settled::Unknown;
        };
        baseline.outstanding = baseline.outstanding.saturating_sub(1);
        if ok {
            baseline.score += pending.submitted.value() - baseline.vote.value();
            baseline.vote = pending.submitted;
        }

        if !later_in_flight {
            if let Some(post) = posts.iter_mut().find(|p| p.id == pending.post_id) {
                post.restore(baseline.score, baseline.vote);
            }
        }
        if baseline.outstanding == 0 {
            self.baselines.remove(&pending.post_id);
        }

        match (ok, later_in_flight) {
            (true, _) => Settled::Confirmed,
            (false, true) => Settled::Superseded {
                post_id: pending.post_id,
            },
            (false, false) => Settled::RolledBack {
                post_id: pending.post_id,
            },
        }
    }
}

/// Sends a vote. A missing or blank token fails before any request.
pub fn submit(
    gateway: &dyn Gateway,
    credentials: &dyn CredentialProvider,
    post_id: &str,
    direction: Vote,
) -> FeedResult<()> {
    let Some(token) = usable_token(credentials) else {
        return Err(FeedError::AuthRequired);
    };
    gateway.submit_vote(&token, post_id, direction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn table_is_complete() {
        let table = [
            (Vote::None, Direction::Up, Vote::Up, 1),
            (Vote::Up, Direction::Up, Vote::None, -1),
            (Vote::None, Direction::Down, Vote::Down, -1),
            (Vote::Down, Direction::Down, Vote::None, 1),
            (Vote::Up, Direction::Down, Vote::Down, -2),
            (Vote::Down, Direction::Up, Vote::Up, 2),
        ];
        for (current, tapped, expected, delta) in table {
            assert_eq!(toggle(current, tapped), (expected, delta), "{current:?} + {tapped:?}");
        }
    }

    #[test]
    fn double_tap_down_scenario() {
        let mut reconciler = Reconciler::default();
        let mut post = Post::new("t3_a", "a", 10, Vote::None);
        reconciler.tap(&mut post, Direction::Down);
        assert_eq!((post.score(), post.vote()), (9, Vote::Down));
        reconciler.tap(&mut post, Direction::Down);
        assert_eq!((post.score(), post.vote()), (10, Vote::None));
    }

    #[test]
    fn failed_vote_rolls_back() {
        let mut reconciler = Reconciler::default();
        let mut post = Post::new("t3_a", "a", 10, Vote::None);
        let (ticket, sent) = reconciler.tap(&mut post, Direction::Up);
        assert_eq!(sent, Vote::Up);
        assert_eq!((post.score(), post.vote()), (11, Vote::Up));

        let settled = reconciler.settle(ticket, false, std::slice::from_mut(&mut post));
        assert_eq!(settled, Settled::RolledBack { post_id: "t3_a".into() });
        assert_eq!((post.score(), post.vote()), (10, Vote::None));
        assert_eq!(reconciler.pending(), 0);
    }

    #[test]
    fn overlapping_failures_in_order_restore_original() {
        let mut reconciler = Reconciler::default();
        let mut post = Post::new("t3_a", "a", 10, Vote::None);
        let (first, _) = reconciler.tap(&mut post, Direction::Up);
        let (second, _) = reconciler.tap(&mut post, Direction::Down);
        assert_eq!((post.score(), post.vote()), (9, Vote::Down));

        let settled = reconciler.settle(first, false, std::slice::from_mut(&mut post));
        assert_eq!(settled, Settled::Superseded { post_id: "t3_a".into() });
        assert_eq!((post.score(), post.vote()), (9, Vote::Down));

        let settled = reconciler.settle(second, false, std::slice::from_mut(&mut post));
        assert_eq!(settled, Settled::RolledBack { post_id: "t3_a".into() });
        assert_eq!((post.score(), post.vote()), (10, Vote::None));
        assert_eq!(reconciler.pending(), 0);
    }

    #[test]
    fn overlapping_failures_in_reverse_restore_original() {
        let mut reconciler = Reconciler::default();
        let mut post = Post::new("t3_a", "a", 10, Vote::None);
        let (first, _) = reconciler.tap(&mut post, Direction::Up);
        let (second, _) = reconciler.tap(&mut post, Direction::Up);
        assert_eq!((post.score(), post.vote()), (10, Vote::None));

        reconciler.settle(second, false, std::slice::from_mut(&mut post));
        assert_eq!((post.score(), post.vote()), (10, Vote::None));
        let settled = reconciler.settle(first, false, std::slice::from_mut(&mut post));
        assert_eq!(settled, Settled::RolledBack { post_id: "t3_a".into() });
        assert_eq!((post.score(), post.vote()), (10, Vote::None));
    }

    #[test]
    fn later_failure_falls_back_to_confirmed_vote() {
        let mut reconciler = Reconciler::default();
        let mut post = Post::new("t3_a", "a", 10, Vote::None);
        let (first, _) = reconciler.tap(&mut post, Direction::Up);
        let (second, _) = reconciler.tap(&mut post, Direction::Down);

        assert_eq!(
            reconciler.settle(first, true, std::slice::from_mut(&mut post)),
            Settled::Confirmed
        );
        assert_eq!((post.score(), post.vote()), (9, Vote::Down));

        reconciler.settle(second, false, std::slice::from_mut(&mut post));
        assert_eq!((post.score(), post.vote()), (11, Vote::Up));
    }

    #[test]
    fn late_confirmation_after_rollback_shows_accepted_vote() {
        let mut reconciler = Reconciler::default();
        let mut post = Post::new("t3_a", "a", 10, Vote::None);
        let (first, _) = reconciler.tap(&mut post, Direction::Up);
        let (second, _) = reconciler.tap(&mut post, Direction::Down);

        reconciler.settle(second, false, std::slice::from_mut(&mut post));
        assert_eq!((post.score(), post.vote()), (10, Vote::None));
        reconciler.settle(first, true, std::slice::from_mut(&mut post));
        assert_eq!((post.score(), post.vote()), (11, Vote::Up));
    }

    #[test]
    fn unknown_ticket_is_ignored() {
        let mut reconciler = Reconciler::default();
        assert_eq!(reconciler.settle(42, false, &mut []), Settled::Unknown);
    }

    fn any_vote() -> impl Strategy<Value = Vote> {
        prop_oneof![Just(Vote::Up), Just(Vote::Down), Just(Vote::None)]
    }

    fn any_direction() -> impl Strategy<Value = Direction> {
        prop_oneof![Just(Direction::Up), Just(Direction::Down)]
    }

    fn taps_and_order() -> impl Strategy<Value = (Vec<Direction>, Vec<usize>)> {
        proptest::collection::vec(any_direction(), 1..6).prop_flat_map(|taps| {
            let order = Just((0..taps.len()).collect::<Vec<_>>()).prop_shuffle();
            (Just(taps), order)
        })
    }

    proptest! {
        #[test]
        fn prop_post_ends_on_last_accepted_vote(
            score in -10_000i64..10_000,
            vote in any_vote(),
            input in taps_and_order(),
            outcomes in proptest::collection::vec(any::<bool>(), 6),
        ) {
            let (taps, order) = input;
            let mut reconciler = Reconciler::default();
            let mut post = Post::new("t3_p", "p", score, vote);
            let submitted: Vec<(Ticket, Vote)> = taps
                .iter()
                .map(|&tapped| reconciler.tap(&mut post, tapped))
                .collect();

            let mut accepted = vote;
            for i in order {
                let (ticket, sent) = submitted[i];
                if outcomes[i] {
                    accepted = sent;
                }
                reconciler.settle(ticket, outcomes[i], std::slice::from_mut(&mut post));
            }
            prop_assert_eq!(post.vote(), accepted);
            prop_assert_eq!(post.score(), score + accepted.value() - vote.value());
            prop_assert_eq!(reconciler.pending(), 0);
        }

        #[test]
        fn prop_same_tap_twice_is_identity(
            score in -10_000i64..10_000,
            vote in any_vote(),
            tapped in any_direction(),
        ) {
            let mut reconciler = Reconciler::default();
            let mut post = Post::new("t3_p", "p", score, vote);
            reconciler.tap(&mut post, tapped);
            reconciler.tap(&mut post, tapped);
            if vote == Vote::None || vote == match tapped { Direction::Up => Vote::Up, Direction::Down => Vote::Down } {
                prop_assert_eq!((post.score(), post.vote()), (score, vote));
            } else {
                // Opposite vote: first tap switches, second clears.
                prop_assert_eq!(post.vote(), Vote::None);
                prop_assert_eq!(post.score(), score - vote.value());
            }
        }

        #[test]
        fn prop_delta_matches_score_change(
            score in -10_000i64..10_000,
            vote in any_vote(),
            tapped in any_direction(),
        ) {
            let (next, delta) = toggle(vote, tapped);
            let mut post = Post::new("t3_p", "p", score, vote);
            prop_assert_eq!(post.set_vote(next), delta);
            prop_assert_eq!(post.score(), score + delta);
        }
    }
}
