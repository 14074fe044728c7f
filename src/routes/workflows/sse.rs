use super::prelude::*;
use super::runs::load_run_detail;
use tokio::sync::broadcast::error::RecvError;

/// Live view of one run. A snapshot of the current state is sent on
/// connect; after that the broker's change signals drive one fresh
/// snapshot per message. Signals carry no payload, so a dropped signal
/// only delays the next refresh; the emitted state is always re-read from
/// the store.
pub async fn sse_run_updates(
    State(app_state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let state = app_state.clone();
    let s = stream! {
        // subscribe before the first read so no transition can slip
        // between snapshot and stream
        let mut signals = state.broker.subscribe_run_updated(run_id);

        match load_run_detail(&state, run_id).await {
            Ok(Some(detail)) => {
                let ev = Event::default().event("run").json_data(&detail).unwrap();
                yield Ok::<Event, Infallible>(ev);
            }
            Ok(None) => {
                let ev = Event::default().event("error").data("run_not_found");
                yield Ok::<Event, Infallible>(ev);
                return;
            }
            Err(err) => {
                tracing::error!(%run_id, ?err, "failed to load run for stream");
                let ev = Event::default().event("error").data("fetch_failed");
                yield Ok::<Event, Infallible>(ev);
                return;
            }
        }

        loop {
            match signals.recv().await {
                // a lagged subscriber just lost intermediate signals; the
                // next snapshot already reflects the latest state
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }

            match load_run_detail(&state, run_id).await {
                Ok(Some(detail)) => {
                    let ev = Event::default().event("run").json_data(&detail).unwrap();
                    yield Ok::<Event, Infallible>(ev);
                }
                Ok(None) => {
                    let ev = Event::default().event("error").data("run_not_found");
                    yield Ok::<Event, Infallible>(ev);
                    break;
                }
                Err(err) => {
                    tracing::error!(%run_id, ?err, "failed to refresh run for stream");
                }
            }
        }
    };

    Sse::new(s).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(10))
            .text("keepalive"),
    )
}
