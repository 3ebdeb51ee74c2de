/// The single username/password pair accepted by the proxy.
///
/// Both sides of the comparison are raw bytes: clients are not required to
/// send UTF-8.
#[derive(Clone)]
pub struct Credentials {
    username: Vec<u8>,
    password: Vec<u8>,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Credentials {
            username: username.as_bytes().to_vec(),
            password: password.as_bytes().to_vec(),
        }
    }

    pub fn verify(&self, username: &[u8], password: &[u8]) -> bool {
        self.username == username && self.password == password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &String::from_utf8_lossy(&self.username))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify() {
        let credentials = Credentials::new("admin", "password");

        assert!(credentials.verify(b"admin", b"password"));
        assert!(!credentials.verify(b"admin", b"wrongpass"));
        assert!(!credentials.verify(b"nonexistent", b"password"));
        assert!(!credentials.verify(b"Admin", b"password"));
        assert!(!credentials.verify(b"admin", b"password\0"));
        assert!(!credentials.verify(b"", b""));
    }

    #[test]
    fn test_non_utf8_bytes() {
        let credentials = Credentials::new("user", "pass");
        assert!(!credentials.verify(&[0xff, 0xfe], b"pass"));
    }
}
