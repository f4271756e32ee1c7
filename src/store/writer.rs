use std::io;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::model::Event;
use crate::observability::{JOURNAL_FLUSH_BATCH_SIZE, JOURNAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

type Ack = oneshot::Sender<io::Result<()>>;

pub(super) enum JournalCommand {
    Append { event: Event, response: Ack },
    Compact { events: Vec<Event>, response: Ack },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// Owns the journal and batches appends for group commit.
///
/// Blocks for the first append, drains whatever else is already queued, then
/// syncs once for the whole batch and acks every sender with the same result.
pub(super) async fn journal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let JournalCommand::Append { event, response } = cmd else {
            handle_other(&mut wal, cmd);
            continue;
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(JournalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let started = Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(JOURNAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let _ = tx.send(clone_result(&result));
        }

        // Non-append commands run only after the batch before them is durable.
        if let Some(cmd) = deferred {
            handle_other(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, Ack)]) -> io::Result<()> {
    let append = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't ride along
    // with the next batch.
    let flush = wal.flush_sync();
    append.and(flush)
}

fn clone_result(result: &io::Result<()>) -> io::Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
    }
}

fn handle_other(wal: &mut Wal, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        JournalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            let _ = response.send(result);
        }
    }
}
