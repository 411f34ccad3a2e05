//! Exports Wi-Fi settings from `.env` to the firmware build

const EXPORTED: [&str; 3] = [
    "PITCALLER_KNOWN_NETWORKS",
    "PITCALLER_AP_SSID",
    "PITCALLER_AP_PASSWORD",
];

fn main() {
    // A missing .env is fine, the defaults in pitcaller-core apply
    let _ = dotenvy::dotenv();

    println!("cargo:rerun-if-changed=.env");
    for key in EXPORTED {
        println!("cargo:rerun-if-env-changed={key}");
        if let Ok(value) = std::env::var(key) {
            println!("cargo:rustc-env={key}={value}");
        }
    }

    println!("cargo:rustc-link-arg=-Tlinkall.x");
}
