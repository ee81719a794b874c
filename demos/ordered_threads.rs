use std::io;

use cpubind::prelude::*;

fn main() {
    // Four workers, counter published before they start
    let team = ThreadTeam::new(4).expect("non-empty team");
    let results = team
        .run(ThreadBinding, WriterSink::stdout(ReportFormat::Mask))
        .expect("team run");
    println!("pool: {} of {} ok", results.iter().filter(|r| r.is_ok()).count(), results.len());

    // Same team behind a rendezvous, CPU lists instead of masks
    let team = ThreadTeam::new(4).expect("non-empty team").launch(Launch::Rendezvous);
    team.run(ThreadBinding, WriterSink::new(io::stdout(), ReportFormat::List))
        .expect("team run");

    // Collect in memory and print afterwards
    let sink = MemorySink::new();
    ThreadTeam::new(3)
        .expect("non-empty team")
        .run(ThreadBinding, &sink)
        .expect("team run");
    for (who, report) in sink.reports() {
        println!("worker {who} may run on {} cpus: {}", report.count(), report.to_list());
    }
}
