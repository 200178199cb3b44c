use auth_orchestrator::AuthSnapshot;
use onboarding_records::ReferenceReport;
use reachability_probe::Reachability;

pub fn print_snapshot(snapshot: &AuthSnapshot) -> serde_json::Result<()> {
    println!("screen: {}", snapshot.screen().as_str());
    if let Some(error) = &snapshot.error {
        println!("error: {}", error.message);
    }
    if snapshot.network_degraded {
        println!("note: network unavailable, showing what could be loaded");
    }
    println!("{}", serde_json::to_string_pretty(snapshot)?);
    Ok(())
}

pub fn print_reachability(reachability: &Reachability) {
    match (&reachability.endpoint, reachability.latency) {
        (Some(endpoint), Some(latency)) if reachability.reachable => {
            println!("reachable via {endpoint} in {} ms", latency.as_millis())
        }
        _ => println!("unreachable"),
    }
    for failure in &reachability.failures {
        println!("  {failure}");
    }
}

pub fn print_reference_report(report: &ReferenceReport) {
    for count in &report.counts {
        match count.rows {
            Some(rows) => println!("{:<20} {rows}", count.table),
            None => println!("{:<20} unreadable", count.table),
        }
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    if report.is_clean() {
        println!("reference data ok");
    }
}
