use cpujitter_core::{Collector, CollectorConfig, sample_report};

pub fn run(bytes: usize, json: bool, config: CollectorConfig) -> i32 {
    let bytes = bytes.max(64);

    let mut collector = match Collector::new(config) {
        Ok(collector) => collector,
        Err(err) => {
            eprintln!("cannot create collector: {err}");
            return 1;
        }
    };

    let mut buf = vec![0u8; bytes];
    if let Err(err) = collector.read(&mut buf) {
        eprintln!("collection failed: {err}");
        return 1;
    }

    let report = sample_report(&buf);
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).expect("report serializes")
        );
    } else {
        println!("{report}");
    }
    0
}
