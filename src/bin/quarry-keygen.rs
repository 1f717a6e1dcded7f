#![forbid(unsafe_code)]
use colored::*;
use quarrychain::crypto::{address_to_hex, KeyPair};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let keypair = KeyPair::generate()?;

    println!("{}", "New QuarryChain key".bright_cyan().bold());
    println!("  {} {}", "Address:".bright_green(), address_to_hex(&keypair.address()));
    println!("  {} {}", "Secret: ".bright_red(), keypair.secret_key_hex());
    println!();
    println!("{}", "Keep the secret key private.".yellow());
    Ok(())
}
