//! `/ToUnicode` CMaps.
//!
//! Composite fonts draw glyph codes, not characters; the font's ToUnicode
//! CMap is the only reliable way back to text. The parser understands the
//! `codespacerange`, `bfchar` and `bfrange` sections, which is what Word,
//! LibreOffice and most PDF libraries emit.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
enum Target {
    /// Destination of the first code; later codes increment its last unit.
    Offset(Vec<u16>),
    /// One destination per code.
    Each(Vec<Vec<u16>>),
}

#[derive(Debug, Clone, PartialEq)]
struct Mapping {
    high: u32,
    target: Target,
}

#[derive(Debug, Clone, PartialEq)]
struct CodeSpace {
    low: Vec<u8>,
    high: Vec<u8>,
}

impl CodeSpace {
    fn matches(&self, bytes: &[u8]) -> bool {
        bytes.len() == self.low.len()
            && bytes
                .iter()
                .zip(self.low.iter().zip(&self.high))
                .all(|(byte, (low, high))| (low..=high).contains(&byte))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToUnicodeMap {
    spaces: Vec<CodeSpace>,
    /// Keyed by `(code length, first code)`.
    mappings: BTreeMap<(usize, u32), Mapping>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Hex(Vec<u8>),
    Open,
    Close,
    Word(String),
}

impl ToUnicodeMap {
    pub fn parse(data: &[u8]) -> Self {
        let mut map = ToUnicodeMap::default();
        let mut tokens = tokenize(data).into_iter().peekable();

        while let Some(token) = tokens.next() {
            let Token::Word(word) = token else {
                continue;
            };
            match word.as_str() {
                "begincodespacerange" => {
                    while let Some(Token::Hex(low)) = tokens.next_if(|t| matches!(t, Token::Hex(_))) {
                        if let Some(Token::Hex(high)) = tokens.next_if(|t| matches!(t, Token::Hex(_))) {
                            if low.len() == high.len() && !low.is_empty() {
                                map.spaces.push(CodeSpace { low, high });
                            }
                        }
                    }
                }
                "beginbfchar" => {
                    while let Some(Token::Hex(source)) = tokens.next_if(|t| matches!(t, Token::Hex(_))) {
                        if let Some(Token::Hex(target)) = tokens.next_if(|t| matches!(t, Token::Hex(_))) {
                            map.insert(&source, &source, Target::Each(vec![utf16_units(&target)]));
                        }
                    }
                }
                "beginbfrange" => {
                    while let Some(Token::Hex(low)) = tokens.next_if(|t| matches!(t, Token::Hex(_))) {
                        let Some(Token::Hex(high)) = tokens.next_if(|t| matches!(t, Token::Hex(_)))
                        else {
                            break;
                        };
                        match tokens.next() {
                            Some(Token::Hex(target)) => {
                                map.insert(&low, &high, Target::Offset(utf16_units(&target)));
                            }
                            Some(Token::Open) => {
                                let mut targets = Vec::new();
                                while let Some(Token::Hex(target)) =
                                    tokens.next_if(|t| matches!(t, Token::Hex(_)))
                                {
                                    targets.push(utf16_units(&target));
                                }
                                tokens.next_if_eq(&Token::Close);
                                map.insert(&low, &high, Target::Each(targets));
                            }
                            _ => break,
                        }
                    }
                }
                _ => {}
            }
        }

        map
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    fn insert(&mut self, low: &[u8], high: &[u8], target: Target) {
        if low.is_empty() || low.len() > 4 || low.len() != high.len() {
            return;
        }
        let (low_code, high_code) = (code_value(low), code_value(high));
        if high_code < low_code {
            return;
        }
        self.mappings.insert(
            (low.len(), low_code),
            Mapping {
                high: high_code,
                target,
            },
        );
    }

    /// The text of one code, when the map covers it.
    pub fn lookup(&self, code: &[u8]) -> Option<String> {
        let value = code_value(code);
        let (&(_, low), mapping) = self
            .mappings
            .range((code.len(), 0)..=(code.len(), value))
            .next_back()?;
        if value > mapping.high {
            return None;
        }
        let offset = value - low;
        let units = match &mapping.target {
            Target::Offset(base) => {
                let mut units = base.clone();
                let last = units.last_mut()?;
                *last = last.wrapping_add(u16::try_from(offset).ok()?);
                units
            }
            Target::Each(targets) => targets.get(usize::try_from(offset).ok()?)?.clone(),
        };
        Some(
            String::from_utf16_lossy(&units)
                .chars()
                .filter(|ch| !ch.is_control() || *ch == ' ')
                .collect(),
        )
    }

    /// Splits a shown string into codes. The declared codespace ranges
    /// decide each code's width; without them every code is
    /// `default_width` bytes.
    pub fn codes<'b>(&self, bytes: &'b [u8], default_width: usize) -> Vec<&'b [u8]> {
        let mut codes = Vec::new();
        let mut rest = bytes;
        while !rest.is_empty() {
            let width = self
                .spaces
                .iter()
                .map(|space| space.low.len())
                .filter(|&width| width <= rest.len())
                .find(|&width| {
                    self.spaces
                        .iter()
                        .any(|space| space.matches(&rest[..width]))
                })
                .unwrap_or(default_width)
                .clamp(1, rest.len());
            let (code, tail) = rest.split_at(width);
            codes.push(code);
            rest = tail;
        }
        codes
    }
}

fn code_value(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |value, byte| (value << 8) | u32::from(*byte))
}

fn utf16_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|pair| match pair {
            [high, low] => u16::from_be_bytes([*high, *low]),
            [single] => u16::from(*single),
            _ => 0,
        })
        .collect()
}

fn tokenize(data: &[u8]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < data.len() {
        let byte = data[index];
        match byte {
            b'%' => {
                while index < data.len() && data[index] != b'\n' && data[index] != b'\r' {
                    index += 1;
                }
            }
            b'<' if data.get(index + 1) == Some(&b'<') => {
                tokens.push(Token::Word("<<".to_string()));
                index += 2;
            }
            b'>' if data.get(index + 1) == Some(&b'>') => {
                tokens.push(Token::Word(">>".to_string()));
                index += 2;
            }
            b'<' => {
                let start = index + 1;
                let end = data[start..]
                    .iter()
                    .position(|&byte| byte == b'>')
                    .map_or(data.len(), |offset| start + offset);
                tokens.push(Token::Hex(hex_bytes(&data[start..end])));
                index = end + 1;
            }
            b'[' => {
                tokens.push(Token::Open);
                index += 1;
            }
            b']' => {
                tokens.push(Token::Close);
                index += 1;
            }
            b'(' => {
                let mut depth = 0usize;
                while index < data.len() {
                    match data[index] {
                        b'\\' => index += 1,
                        b'(' => depth += 1,
                        b')' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    index += 1;
                }
                tokens.push(Token::Word(String::new()));
                index += 1;
            }
            _ if byte.is_ascii_whitespace() => index += 1,
            _ => {
                let start = index;
                index += 1;
                while index < data.len() && !is_delimiter(data[index]) {
                    index += 1;
                }
                tokens.push(Token::Word(
                    String::from_utf8_lossy(&data[start..index]).to_string(),
                ));
            }
        }
    }

    tokens
}

fn is_delimiter(byte: u8) -> bool {
    byte.is_ascii_whitespace() || matches!(byte, b'<' | b'>' | b'[' | b']' | b'(' | b')' | b'/' | b'%')
}

fn hex_bytes(digits: &[u8]) -> Vec<u8> {
    let nibbles: Vec<u8> = digits
        .iter()
        .filter_map(|digit| (*digit as char).to_digit(16).map(|value| value as u8))
        .collect();
    nibbles
        .chunks(2)
        .map(|pair| match pair {
            [high, low] => (high << 4) | low,
            [high] => high << 4,
            _ => 0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY_CMAP: &str = "/CIDInit /ProcSet findresource begin
12 dict begin
begincmap
/CMapName /Adobe-Identity-UCS def
1 begincodespacerange
<0000> <FFFF>
endcodespacerange
2 beginbfchar
<0003> <0020>
<0024> <6E2C>
endbfchar
2 beginbfrange
<0010> <0012> <0041>
<0020> <0021> [<8A66> <D83DDE00>]
endbfrange
endcmap
CMapName currentdict /CMap defineresource pop
end
end";

    #[test]
    fn single_and_ranged_codes_are_mapped() {
        let map = ToUnicodeMap::parse(IDENTITY_CMAP.as_bytes());

        assert_eq!(map.lookup(&[0x00, 0x03]).as_deref(), Some(" "));
        assert_eq!(map.lookup(&[0x00, 0x24]).as_deref(), Some("測"));
        assert_eq!(map.lookup(&[0x00, 0x10]).as_deref(), Some("A"));
        assert_eq!(map.lookup(&[0x00, 0x12]).as_deref(), Some("C"));
        assert_eq!(map.lookup(&[0x00, 0x20]).as_deref(), Some("試"));
        assert_eq!(map.lookup(&[0x00, 0x21]).as_deref(), Some("😀"));
        assert_eq!(map.lookup(&[0x00, 0x13]), None);
        assert_eq!(map.lookup(&[0x10]), None);
    }

    #[test]
    fn codespace_decides_code_width() {
        let map = ToUnicodeMap::parse(IDENTITY_CMAP.as_bytes());
        let codes = map.codes(&[0x00, 0x10, 0x00, 0x24, 0x07], 1);
        assert_eq!(codes, vec![&[0x00, 0x10][..], &[0x00, 0x24][..], &[0x07][..]]);

        let bare = ToUnicodeMap::default();
        assert_eq!(bare.codes(&[1, 2, 3], 2), vec![&[1, 2][..], &[3][..]]);
    }

    #[test]
    fn garbage_yields_an_empty_map() {
        assert!(ToUnicodeMap::parse(b"not a cmap at all <zz").is_empty());
    }
}
