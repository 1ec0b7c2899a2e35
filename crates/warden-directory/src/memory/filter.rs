//! RFC 4515 search filter parsing

use warden_core::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Equal(String, String),
    Approx(String, String),
    GreaterOrEqual(String, String),
    LessOrEqual(String, String),
    Present(String),
    Substring {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
    Extensible {
        attr: String,
        rule: Option<String>,
        value: String,
    },
}

pub fn parse(input: &str) -> Result<Filter> {
    let mut parser = Parser {
        input: input.trim().as_bytes(),
        pos: 0,
    };
    let filter = parser.filter()?;
    if parser.pos != parser.input.len() {
        return Err(parser.error("trailing characters"));
    }
    Ok(filter)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, what: &str) -> Error {
        Error::InvalidArgument(format!(
            "bad search filter at offset {}: {} in {}",
            self.pos,
            what,
            String::from_utf8_lossy(self.input)
        ))
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c as char)))
        }
    }

    fn filter(&mut self) -> Result<Filter> {
        self.expect(b'(')?;
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end")),
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn list(&mut self) -> Result<Vec<Filter>> {
        let mut filters = Vec::new();
        while self.peek() == Some(b'(') {
            filters.push(self.filter()?);
        }
        Ok(filters)
    }

    fn item(&mut self) -> Result<Filter> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b')' || c == b'(' {
                break;
            }
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("invalid utf-8"))?;

        let eq = text.find('=').ok_or_else(|| self.error("missing '='"))?;
        let (lhs, raw) = (&text[..eq], &text[eq + 1..]);

        if let Some(desc) = lhs.strip_suffix(':') {
            let mut parts = desc.split(':');
            let attr = parts.next().unwrap_or_default().to_string();
            let rule = parts
                .filter(|p| !p.eq_ignore_ascii_case("dn"))
                .last()
                .map(str::to_string);
            return Ok(Filter::Extensible {
                attr,
                rule,
                value: unescape(raw)?,
            });
        }
        if let Some(attr) = lhs.strip_suffix('>') {
            return Ok(Filter::GreaterOrEqual(attr.to_string(), unescape(raw)?));
        }
        if let Some(attr) = lhs.strip_suffix('<') {
            return Ok(Filter::LessOrEqual(attr.to_string(), unescape(raw)?));
        }
        if let Some(attr) = lhs.strip_suffix('~') {
            return Ok(Filter::Approx(attr.to_string(), unescape(raw)?));
        }
        if lhs.is_empty() {
            return Err(self.error("missing attribute"));
        }

        let attr = lhs.to_string();
        if raw == "*" {
            return Ok(Filter::Present(attr));
        }
        if !raw.contains('*') {
            return Ok(Filter::Equal(attr, unescape(raw)?));
        }

        let parts: Vec<&str> = raw.split('*').collect();
        let non_empty = |s: &str| -> Result<Option<String>> {
            if s.is_empty() {
                Ok(None)
            } else {
                unescape(s).map(Some)
            }
        };
        let initial = non_empty(parts[0])?;
        let last = non_empty(parts[parts.len() - 1])?;
        let any = parts[1..parts.len() - 1]
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| unescape(p))
            .collect::<Result<Vec<_>>>()?;

        Ok(Filter::Substring {
            attr,
            initial,
            any,
            last,
        })
    }
}

/// Decode `\xx` hex escapes
fn unescape(raw: &str) -> Result<String> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let hex = raw
                .get(i + 1..i + 3)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| {
                    Error::InvalidArgument(format!("bad escape in filter value: {}", raw))
                })?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_composite() {
        let f = parse("(&(sAMAccountName=jdoe)(|(objectClass=user)(!(cn=x))))").unwrap();
        assert_eq!(
            f,
            Filter::And(vec![
                Filter::Equal("sAMAccountName".into(), "jdoe".into()),
                Filter::Or(vec![
                    Filter::Equal("objectClass".into(), "user".into()),
                    Filter::Not(Box::new(Filter::Equal("cn".into(), "x".into()))),
                ]),
            ])
        );
    }

    #[test]
    fn test_parse_substring_and_presence() {
        assert_eq!(parse("(mail=*)").unwrap(), Filter::Present("mail".into()));
        assert_eq!(
            parse("(cn=ab*c*d)").unwrap(),
            Filter::Substring {
                attr: "cn".into(),
                initial: Some("ab".into()),
                any: vec!["c".into()],
                last: Some("d".into()),
            }
        );
        assert_eq!(
            parse("(cn=*mid*)").unwrap(),
            Filter::Substring {
                attr: "cn".into(),
                initial: None,
                any: vec!["mid".into()],
                last: None,
            }
        );
    }

    #[test]
    fn test_parse_escapes_and_extensible() {
        assert_eq!(
            parse("(cn=a\\2ab\\28\\29)").unwrap(),
            Filter::Equal("cn".into(), "a*b()".into())
        );
        assert_eq!(
            parse("(member:1.2.840.113556.1.4.1941:=CN=u,DC=corp)").unwrap(),
            Filter::Extensible {
                attr: "member".into(),
                rule: Some("1.2.840.113556.1.4.1941".into()),
                value: "CN=u,DC=corp".into(),
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("(cn=a").is_err());
        assert!(parse("cn=a").is_err());
        assert!(parse("(cn=a))").is_err());
        assert!(parse("(=a)").is_err());
        assert!(parse("(cn=\\zz)").is_err());
    }
}
