use std::env;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Usage: test_socks5 [proxy_addr] [username] [password]
fn main() {
    let mut args = env::args().skip(1);
    let proxy = args.next().unwrap_or_else(|| "127.0.0.1:10883".to_string());
    let username = args.next().unwrap_or_else(|| "username".to_string());
    let password = args.next().unwrap_or_else(|| "password".to_string());

    match test_socks5_handshake(&proxy, &username, &password) {
        Ok(()) => {
            println!("SOCKS5 proxy handshake test passed");
            std::process::exit(0);
        }
        Err(e) => {
            println!("SOCKS5 proxy test failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn test_socks5_handshake(
    proxy: &str,
    username: &str,
    password: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Connecting to SOCKS5 proxy at {}...", proxy);

    let mut sock = TcpStream::connect(proxy)?;
    sock.set_read_timeout(Some(Duration::from_secs(5)))?;
    println!("Connected successfully");

    // version 5, 1 method, method 2 (username/password)
    sock.write_all(b"\x05\x01\x02")?;
    let mut response = [0u8; 2];
    sock.read_exact(&mut response)?;
    println!(
        "Method selection received: {:02x} {:02x}",
        response[0], response[1]
    );
    if response != [0x05, 0x02] {
        return Err(format!("Invalid method selection: {:?}", response).into());
    }

    let mut auth = vec![0x01, username.len() as u8];
    auth.extend_from_slice(username.as_bytes());
    auth.push(password.len() as u8);
    auth.extend_from_slice(password.as_bytes());
    sock.write_all(&auth)?;

    sock.read_exact(&mut response)?;
    println!(
        "Authentication status received: {:02x} {:02x}",
        response[0], response[1]
    );
    if response != [0x01, 0x00] {
        return Err(format!("Authentication rejected: {:?}", response).into());
    }

    println!("SOCKS5 proxy handshake successful!");
    Ok(())
}
