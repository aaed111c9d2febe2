use actix_web::{HttpResponse, Responder, post, web};
use serde::{Deserialize, Serialize};

use super::ErrorResponseWithMessage;
use crate::create_timestamp;
use crate::sandbox::{Scorer, TestCase, VerdictRecord};
use crate::session::PromptTicket;

#[derive(Serialize, Deserialize, Debug)]
pub struct ScoreRequest {
    pub code: String,
    #[serde(default)]
    pub testcases: Vec<TestCase>,
    /// Trusted as given; the calling application sets these from its own session
    pub user_id: Option<u32>,
    pub challenge_id: Option<u32>,
    /// Returned by the generation step; redeemed only if every case passes
    pub ticket: Option<PromptTicket>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ScoreResponse {
    pub verdicts: Vec<VerdictRecord>,
    pub all_accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub scored_at: String,
}

#[post("/score")]
pub async fn post_score_handler(
    scorer: web::Data<Scorer>,
    body: web::Json<ScoreRequest>,
) -> impl Responder {
    let ScoreRequest {
        code,
        testcases,
        user_id,
        challenge_id,
        ticket,
    } = body.into_inner();

    log::info!("Scoring submission against {} test case(s)", testcases.len());

    match scorer.score(&code, &testcases).await {
        Ok(batch) => {
            let prompt = match (ticket, user_id, challenge_id) {
                (Some(ticket), Some(user_id), Some(challenge_id)) => {
                    ticket.redeem(user_id, challenge_id, &batch)
                }
                _ => None,
            };

            HttpResponse::Ok().json(ScoreResponse {
                verdicts: batch.records(),
                all_accepted: batch.all_accepted(),
                prompt,
                scored_at: create_timestamp(),
            })
        }
        Err(e) if e.is_caller_error() => HttpResponse::BadRequest().json(ErrorResponseWithMessage {
            reason: "ERR_INVALID_ARGUMENT",
            code: 1,
            message: e.to_string(),
        }),
        Err(e) => {
            log::error!("Scoring unavailable: {e}");
            HttpResponse::ServiceUnavailable().json(ErrorResponseWithMessage {
                reason: "ERR_SCORING_UNAVAILABLE",
                code: 7,
                message: e.to_string(),
            })
        }
    }
}
