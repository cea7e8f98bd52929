//! Well-known string formats

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Format {
    Email,
    Uri,
    Date,
    DateTime,
    Uuid,
    Ipv4,
}

impl Format {
    /// Known format by its schema name; unknown formats are unconstrained.
    pub(crate) fn parse(name: &str) -> Option<Self> {
        match name {
            "email" => Some(Self::Email),
            "uri" | "url" => Some(Self::Uri),
            "date" => Some(Self::Date),
            "date-time" => Some(Self::DateTime),
            "uuid" => Some(Self::Uuid),
            "ipv4" => Some(Self::Ipv4),
            _ => None,
        }
    }

    pub(crate) const fn name(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Uri => "uri",
            Self::Date => "date",
            Self::DateTime => "date-time",
            Self::Uuid => "uuid",
            Self::Ipv4 => "ipv4",
        }
    }

    pub(crate) fn generate<R: Rng + ?Sized>(self, rng: &mut R) -> String {
        match self {
            Self::Email => format!("user{}@example.com", rng.gen_range(1..9999_u32)),
            Self::Uri => format!("https://example.com/{}", super::random_alnum(rng, 6)),
            Self::Date => random_date(rng),
            Self::DateTime => format!(
                "{}T{:02}:{:02}:{:02}Z",
                random_date(rng),
                rng.gen_range(0..24_u32),
                rng.gen_range(0..60_u32),
                rng.gen_range(0..60_u32)
            ),
            Self::Uuid => format!(
                "{:08x}-{:04x}-4{:03x}-{:04x}-{:012x}",
                rng.r#gen::<u32>(),
                rng.r#gen::<u16>(),
                rng.r#gen::<u16>() & 0x0FFF,
                (rng.r#gen::<u16>() & 0x3FFF) | 0x8000,
                rng.r#gen::<u64>() & 0xFFFF_FFFF_FFFF,
            ),
            Self::Ipv4 => format!(
                "{}.{}.{}.{}",
                rng.r#gen::<u8>(),
                rng.r#gen::<u8>(),
                rng.r#gen::<u8>(),
                rng.r#gen::<u8>()
            ),
        }
    }

    pub(crate) fn matches(self, s: &str) -> bool {
        match self {
            Self::Email => is_email(s),
            Self::Uri => is_uri(s),
            Self::Date => is_date(s),
            Self::DateTime => is_date_time(s),
            Self::Uuid => is_uuid(s),
            Self::Ipv4 => {
                let parts: Vec<&str> = s.split('.').collect();
                parts.len() == 4
                    && parts
                        .iter()
                        .all(|p| !p.is_empty() && p.len() <= 3 && p.parse::<u8>().is_ok())
            }
        }
    }
}

fn random_date<R: Rng + ?Sized>(rng: &mut R) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        rng.gen_range(1970..2100_u32),
        rng.gen_range(1..=12_u32),
        rng.gen_range(1..=28_u32)
    )
}

fn digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn is_date(s: &str) -> bool {
    let mut parts = s.split('-');
    let (Some(y), Some(m), Some(d), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    y.len() == 4
        && m.len() == 2
        && d.len() == 2
        && digits(y).is_some()
        && digits(m).is_some_and(|m| (1..=12).contains(&m))
        && digits(d).is_some_and(|d| (1..=31).contains(&d))
}

fn is_date_time(s: &str) -> bool {
    let Some((date, time)) = s.split_once(['T', 't']) else {
        return false;
    };
    let (Some(clock), Some(zone)) = (time.get(..8), time.get(8..)) else {
        return false;
    };
    if !is_date(date) {
        return false;
    }
    let mut fields = clock.split(':');
    let clock_ok = [(23, fields.next()), (59, fields.next()), (60, fields.next())]
        .into_iter()
        .all(|(max, f)| f.is_some_and(|f| f.len() == 2 && digits(f).is_some_and(|v| v <= max)));
    let zone = zone
        .strip_prefix('.')
        .map_or(zone, |z| z.trim_start_matches(|c: char| c.is_ascii_digit()));
    clock_ok
        && (zone.eq_ignore_ascii_case("z")
            || (zone.len() == 6
                && (zone.starts_with('+') || zone.starts_with('-'))
                && zone.as_bytes()[3] == b':'))
}

fn is_uuid(s: &str) -> bool {
    s.len() == 36
        && s.char_indices().all(|(i, c)| match i {
            8 | 13 | 18 | 23 => c == '-',
            _ => c.is_ascii_hexdigit(),
        })
}

fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !s.chars().any(char::is_whitespace)
}

fn is_uri(s: &str) -> bool {
    let Some((scheme, rest)) = s.split_once("://") else {
        return false;
    };
    scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        && !rest.is_empty()
        && !rest.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    const ALL: [Format; 6] = [
        Format::Email,
        Format::Uri,
        Format::Date,
        Format::DateTime,
        Format::Uuid,
        Format::Ipv4,
    ];

    #[test]
    fn generated_values_match_their_format() {
        let mut rng = SmallRng::seed_from_u64(5);
        for format in ALL {
            for _ in 0..20 {
                let value = format.generate(&mut rng);
                assert!(format.matches(&value), "{value:?} is not a valid {}", format.name());
            }
        }
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(!Format::Date.matches("2024-13-01"));
        assert!(!Format::Date.matches("24-01-01"));
        assert!(!Format::DateTime.matches("2024-01-15 12:00:00Z"));
        assert!(Format::DateTime.matches("2024-01-15T12:00:00.123+09:00"));
        assert!(!Format::Uuid.matches("not-a-uuid"));
        assert!(!Format::Email.matches("user@localhost"));
        assert!(!Format::Uri.matches("example.com"));
        assert!(!Format::Ipv4.matches("256.0.0.1"));
    }

    #[test]
    fn unknown_format_is_unconstrained() {
        assert_eq!(Format::parse("binary"), None);
        assert_eq!(Format::parse("url"), Some(Format::Uri));
    }
}
