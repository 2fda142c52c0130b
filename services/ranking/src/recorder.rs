use crate::counter::UserId;
use crate::tracker::Tracker;
use tracing::debug;

/// What recording a message did to the transient tally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// No media: the sender is only registered, with `first_contact` set the
    /// first time they are seen
    Registered { first_contact: bool },
    /// A photo or video was counted; `total` is the sender's new count
    Counted { total: u64 },
}

impl Submission {
    /// Whether the sender should get an acknowledgment
    pub fn acknowledges(&self) -> bool {
        matches!(self, Submission::Counted { .. })
    }
}

impl Tracker {
    /// Record a message from `user` in the transient tally.
    ///
    /// Messages without media only register the sender; messages with a
    /// photo or video also count as one submission. Never persisted here.
    pub fn record_submission(&self, user: UserId, media_present: bool) -> Submission {
        let mut transient = self.transient();

        let submission = if media_present {
            Submission::Counted {
                total: transient.increment(user),
            }
        } else {
            Submission::Registered {
                first_contact: transient.touch(user),
            }
        };

        metrics::gauge!("tally.transient.users").set(transient.len() as f64);
        drop(transient);

        match submission {
            Submission::Counted { total } => {
                metrics::counter!("tally.submissions.counted").increment(1);
                debug!(user = %user, total = total, "Submission counted");
            }
            Submission::Registered { first_contact } => {
                metrics::counter!("tally.submissions.registered").increment(1);
                if first_contact {
                    debug!(user = %user, "New participant registered");
                }
            }
        }

        submission
    }
}
