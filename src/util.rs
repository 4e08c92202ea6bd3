const HEX: &[u8; 16] = b"0123456789abcdef";

/// Per-stream generator for block and call identifiers.
///
/// Identifiers are `<prefix>_<stream-seed>_<seq>`, unique within one stream
/// and, through the random seed, unlikely to collide across streams.
#[derive(Debug, Clone)]
pub(crate) struct IdGenerator {
    seed: String,
    next: u64,
}

impl IdGenerator {
    #[must_use]
    pub(crate) fn new() -> Self {
        let mut seed = String::with_capacity(16);
        push_u64_hex_16(&mut seed, fastrand::u64(..));
        Self::with_seed(seed)
    }

    #[must_use]
    pub(crate) fn with_seed(seed: impl Into<String>) -> Self {
        Self {
            seed: seed.into(),
            next: 0,
        }
    }

    pub(crate) fn next_id(&mut self, prefix: &str) -> String {
        let seq = self.next;
        self.next += 1;
        let mut out = String::with_capacity(prefix.len() + self.seed.len() + 8);
        out.push_str(prefix);
        out.push('_');
        out.push_str(&self.seed);
        out.push('_');
        push_u64_decimal(&mut out, seq);
        out
    }
}

#[inline]
pub(crate) fn push_u64_decimal(out: &mut String, mut n: u64) {
    if n == 0 {
        out.push('0');
        return;
    }

    let mut buf = [0u8; 20];
    let mut i = buf.len();
    while n > 0 {
        i -= 1;
        buf[i] = b'0' + ((n % 10) as u8);
        n /= 10;
    }
    let digits = std::str::from_utf8(&buf[i..]).unwrap_or("0");
    out.push_str(digits);
}

#[inline]
fn push_u64_hex_16(out: &mut String, mut value: u64) {
    let mut buf = [b'0'; 16];
    let mut idx = 16;
    while idx > 0 {
        idx -= 1;
        let nibble = usize::try_from(value & 0x0f).unwrap_or(0);
        buf[idx] = HEX[nibble];
        value >>= 4;
    }
    for byte in buf {
        out.push(char::from(byte));
    }
}

#[cfg(test)]
mod tests {
    use super::{push_u64_decimal, push_u64_hex_16, IdGenerator};

    #[test]
    fn id_generator_is_sequential_per_prefix_stream() {
        let mut ids = IdGenerator::with_seed("abc");
        assert_eq!(ids.next_id("txt"), "txt_abc_0");
        assert_eq!(ids.next_id("rsn"), "rsn_abc_1");
        assert_eq!(ids.next_id("call"), "call_abc_2");
    }

    #[test]
    fn random_seeds_are_sixteen_hex_digits() {
        let mut ids = IdGenerator::new();
        let id = ids.next_id("txt");
        let seed = id.trim_start_matches("txt_").trim_end_matches("_0");
        assert_eq!(seed.len(), 16);
        assert!(seed.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn number_formatting_matches_formatter() {
        for n in [0u64, 7, 10, 1234, u64::MAX] {
            let mut out = String::new();
            push_u64_decimal(&mut out, n);
            assert_eq!(out, n.to_string());
        }
        let mut out = String::new();
        push_u64_hex_16(&mut out, 0x1234_abcd);
        assert_eq!(out, "000000001234abcd");
    }
}
