use serde::{Deserialize, Serialize};

use crate::sandbox::BatchResult;

/// The prompt that produced a piece of code, carried by the caller from the
/// generation step to the scoring step.
///
/// Nothing is kept server-side: whoever issues the ticket hands it back with the
/// score request, so two users or two challenges can never see each other's prompt.
///
/// The binding is only as strong as the ids passed to [`PromptTicket::redeem`].
/// This service has no authentication of its own, so it must sit behind an
/// application that fills `user_id` and `challenge_id` from its authenticated
/// session rather than forwarding whatever the end user sent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PromptTicket {
    pub user_id: u32,
    pub challenge_id: u32,
    pub prompt: String,
}

impl PromptTicket {
    pub fn new(user_id: u32, challenge_id: u32, prompt: impl Into<String>) -> Self {
        Self {
            user_id,
            challenge_id,
            prompt: prompt.into(),
        }
    }

    /// Hands out the prompt once the code it produced passed every test case.
    /// A ticket issued for another user or challenge yields nothing.
    pub fn redeem(self, user_id: u32, challenge_id: u32, batch: &BatchResult) -> Option<String> {
        if self.user_id != user_id || self.challenge_id != challenge_id {
            log::warn!(
                "Prompt ticket for user {} / challenge {} presented by user {user_id} / challenge {challenge_id}",
                self.user_id,
                self.challenge_id
            );
            return None;
        }
        batch.all_accepted().then_some(self.prompt)
    }
}
