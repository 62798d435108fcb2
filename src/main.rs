use std::process::ExitCode;

fn main() -> ExitCode {
    match techpath::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let envelope = serde_json::json!({
                "status": "error",
                "code": e.code(),
                "message": e.to_string(),
            });
            eprintln!("{}", envelope);
            ExitCode::FAILURE
        }
    }
}
