use cpujitter_core::qualify_timer;

pub fn run(json: bool) -> i32 {
    match qualify_timer() {
        Ok(()) => {
            if json {
                println!("{}", serde_json::json!({ "qualified": true }));
            } else {
                println!("timer qualified: high-resolution, monotonic, jittery");
            }
            0
        }
        Err(err) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "qualified": false, "reason": err.to_string() })
                );
            } else {
                eprintln!("timer rejected: {err}");
            }
            1
        }
    }
}
