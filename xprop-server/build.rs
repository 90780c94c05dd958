use std::env;

const STAMPED: [&str; 2] = ["XPROP_COMMIT", "XPROP_BUILD_DATE"];

fn main() {
    for key in STAMPED {
        let value = env::var(key).unwrap_or_else(|_| "unknown".to_string());
        println!("cargo:rustc-env={}={}", key, value);
        println!("cargo:rerun-if-env-changed={}", key);
    }
}
