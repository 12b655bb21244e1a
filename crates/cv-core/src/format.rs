//! Counter formatting in the router UI's metric style: values above 1000 are
//! scaled by 1000 and printed with two decimals and a unit prefix.

const UNITS: [&str; 7] = ["", "K", "M", "G", "T", "P", "E"];
const BASE: f64 = 1000.0;

fn scale(value: u64) -> (f64, usize) {
    let mut scaled = value as f64;
    let mut unit = 0;

    while unit < UNITS.len() - 1 && scaled > BASE {
        scaled /= BASE;
        unit += 1;
    }

    (scaled, unit)
}

/// `1500` -> `1.50 K`; small values are printed as-is
pub fn human_count(value: u64) -> String {
    match scale(value) {
        (_, 0) => value.to_string(),
        (scaled, unit) => format!("{:.2} {}", scaled, UNITS[unit]),
    }
}

/// `2500000` -> `2.50 MB`; small values get a plain `B`
pub fn human_bytes(value: u64) -> String {
    match scale(value) {
        (_, 0) => format!("{} B", value),
        (scaled, unit) => format!("{:.2} {}B", scaled, UNITS[unit]),
    }
}
