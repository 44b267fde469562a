//! Live views over server-sent events.
//!
//! Each connection registers one subscription under its owner; every snapshot it
//! delivers becomes a `snapshot` event. Closing the connection releases the
//! subscription, and so does a denied admission of the owner, which ends the stream.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Extension,
};
use futures::stream::{self, Stream};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::LimitParams;
use crate::auth::Credential;
use crate::db::Subscription;
use crate::errors::AppError;
use crate::feed::LiveLease;
use crate::models::{limits, Donation, DonationSummary, Highlight, TeamMember, Todo};
use crate::AppState;

type SnapshotSender = mpsc::UnboundedSender<Value>;

/// Forward snapshots from a callback into the channel.
fn forward<T: Serialize>(tx: SnapshotSender) -> impl FnMut(T) + Send + 'static {
    move |snapshot| match serde_json::to_value(&snapshot) {
        Ok(value) => {
            // Receiver gone means the client disconnected.
            let _ = tx.send(value);
        }
        Err(e) => tracing::error!(error = %e, "Failed to encode live snapshot"),
    }
}

fn event_stream(
    state: &AppState,
    owner: &str,
    start: impl FnOnce(SnapshotSender) -> Subscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let lease = state.live.register(owner, start(tx));

    let events = stream::unfold((rx, lease), |(mut rx, lease): (_, LiveLease)| async move {
        let snapshot = rx.recv().await?;
        let event = Event::default()
            .event("snapshot")
            .json_data(&snapshot)
            .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()));
        Some((Ok(event), (rx, lease)))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// GET /api/live/{view}
pub async fn live_view(
    State(state): State<AppState>,
    Extension(credential): Extension<Credential>,
    Path(view): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let repos = state.repos.clone();
    let limit = |default| limits::clamp(params.limit, default);

    let start: Box<dyn FnOnce(SnapshotSender) -> Subscription + Send> = match view.as_str() {
        "donations" => {
            let limit = limit(limits::RECENT);
            Box::new(move |tx| repos.donations.listen_recent(limit, forward::<Vec<Donation>>(tx)))
        }
        "completed-donations" => {
            let limit = limit(limits::RECENT);
            Box::new(move |tx| repos.donations.listen_recent_completed(limit, forward::<Vec<DonationSummary>>(tx)))
        }
        "team" => {
            let limit = limit(limits::TEAM_LIST);
            Box::new(move |tx| repos.team.listen_active(limit, forward::<Vec<TeamMember>>(tx)))
        }
        "todos" => Box::new(move |tx| repos.todos.listen_active(forward::<Vec<Todo>>(tx))),
        "highlights" => {
            let limit = limit(limits::RECENT);
            Box::new(move |tx| repos.community.listen_latest_highlights(limit, forward::<Vec<Highlight>>(tx)))
        }
        other => return Err(AppError::NotFound(format!("Unknown live view: {}", other))),
    };

    tracing::debug!(%view, uid = %credential.uid, "Live view opened");
    Ok(event_stream(&state, &credential.uid, start))
}

/// GET /api/live/donations/{id} - `null` snapshots while missing or deleted.
pub async fn live_donation(
    State(state): State<AppState>,
    Extension(credential): Extension<Credential>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let donations = state.repos.donations.clone();
    event_stream(&state, &credential.uid, move |tx| {
        donations.listen_by_id(&id, forward::<Option<Donation>>(tx))
    })
}
