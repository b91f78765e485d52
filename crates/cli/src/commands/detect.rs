//! `chorus detect`: show the wire dialect for a URL.

use chorus_core::WireDialect;

pub fn run(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let dialect = WireDialect::detect(url);
    println!("  URL:           {url}");
    println!("  Dialect:       {dialect}");
    println!("  Client tools:  {}", yes_no(dialect.client_tools()));
    println!("  Stateful:      {}", yes_no(dialect.is_stateful()));
    Ok(())
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}
