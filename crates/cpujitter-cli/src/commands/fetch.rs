use std::fs::File;
use std::io::Write;

use cpujitter_core::{Collector, CollectorConfig};

pub fn run(bytes: usize, output: Option<&str>, config: CollectorConfig) -> i32 {
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

    match output {
        Some(path) => match File::create(path).and_then(|mut file| file.write_all(&buf)) {
            Ok(()) => {
                println!("wrote {} bytes to {path}", buf.len());
                0
            }
            Err(err) => {
                eprintln!("cannot write {path}: {err}");
                1
            }
        },
        None => {
            for chunk in buf.chunks(32) {
                let hex: String = chunk.iter().map(|b| format!("{b:02x}")).collect();
                println!("{hex}");
            }
            0
        }
    }
}
