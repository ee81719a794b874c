use std::thread;

use cpubind::prelude::*;

fn main() {
    // Three ranks as threads, token passed over channels
    let ranks = 3;
    thread::scope(|s| {
        for ep in mesh(ranks).into_iter().rev() {
            s.spawn(move || {
                let rank = ep.rank();
                let sink = WriterSink::stdout(ReportFormat::Json);
                if let Err(e) = run_rank(ep, ThreadBinding, sink, None) {
                    eprintln!("rank {rank}: {e}");
                }
            });
        }
    });

    // Ranks as processes over Unix sockets: `cpubind ranks -n 3`
    #[cfg(unix)]
    {
        let dir = tempfile::tempdir().expect("tempdir");
        thread::scope(|s| {
            for rank in 0..ranks {
                let dir = dir.path();
                s.spawn(move || {
                    let transport = cpubind::rank::SocketTransport::bind(dir, rank, ranks)
                        .expect("bind rank socket");
                    run_rank(transport, ThreadBinding, WriterSink::stdout(ReportFormat::List), None)
                        .expect("rank run");
                });
            }
        });
    }
}
