//! Illustrative binary: loads this process's own DWARF debug info and prints what this crate can
//! see about it — how many compile units were found, what function contains `main`, and a full
//! dump of every DIE tree.
//!
//! Not part of the published API; exists so the crate's behavior can be exercised end to end
//! against a real, fully linked binary rather than only the synthetic fixtures unit tests build.

use spiegel::State;

fn main() {
    tracing_subscriber::fmt::init();

    let mut state = State::new();
    if let Err(err) = state.add_self() {
        eprintln!("failed to load this process's own debug info: {err}");
        std::process::exit(1);
    }

    println!("compile units: {}", state.compile_units().len());

    let here = main as usize as u64;
    match state.describe_address(here) {
        Some(info) => {
            let name = state.get_full_name(info.function);
            println!("address {here:#x} resolves to `{name}` (+{:#x})", info.offset);
        }
        None => println!("address {here:#x} is not covered by any known function range"),
    }

    state.dump_dies();
}
