fn main() {
    println!("Checkers — DENTCP multiplayer server");
    println!();
    println!("Usage:");
    println!("  Start the server:   cargo run --bin server -- <port> [bind_address]");
    println!("  Connect a client:   cargo run --bin client [host:port]");
    println!();
    println!("The client speaks the line-framed DENTCP wire protocol directly;");
    println!("type `help` once connected to see the available commands.");
}
