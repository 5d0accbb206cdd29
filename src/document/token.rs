//! Token records produced by an external analyzer.

/// One token of an analyzed field value.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Term bytes as they will appear in the dictionary.
    pub text: Vec<u8>,
    /// Token position within the field value.
    pub position: u32,
    /// Character offset where the token starts.
    pub start_offset: u32,
    /// Character offset just past the token.
    pub end_offset: u32,
    /// Weight contributed to the posting; usually 1.0.
    pub boost: f32,
}

impl Token {
    pub fn new(text: impl Into<Vec<u8>>, position: u32) -> Self {
        Token {
            text: text.into(),
            position,
            start_offset: 0,
            end_offset: 0,
            boost: 1.0,
        }
    }

    pub fn with_offsets(mut self, start: u32, end: u32) -> Self {
        self.start_offset = start;
        self.end_offset = end;
        self
    }

    pub fn with_boost(mut self, boost: f32) -> Self {
        self.boost = boost;
        self
    }
}

/// A single-use stream of tokens for one field value.
pub type TokenStream = Box<dyn Iterator<Item = Token> + Send>;

/// Tokens for text that is already split on whitespace, numbered from 0
/// with byte offsets into `text`. No normalization is applied.
pub fn tokens_from_words(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut position = 0;
    let mut start = None;

    for (i, ch) in text.char_indices().chain(std::iter::once((text.len(), ' '))) {
        match (ch.is_whitespace(), start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                tokens.push(Token::new(&text.as_bytes()[s..i], position).with_offsets(s as u32, i as u32));
                position += 1;
                start = None;
            }
            _ => {}
        }
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_from_words() {
        let tokens = tokens_from_words("  alfa bravo\tcharlie ");
        let texts: Vec<&[u8]> = tokens.iter().map(|t| t.text.as_slice()).collect();
        assert_eq!(texts, vec![&b"alfa"[..], &b"bravo"[..], &b"charlie"[..]]);
        assert_eq!(tokens[1].position, 1);
        assert_eq!((tokens[1].start_offset, tokens[1].end_offset), (7, 12));
        assert_eq!(tokens[2].boost, 1.0);
    }

    #[test]
    fn test_empty_text() {
        assert!(tokens_from_words("").is_empty());
        assert!(tokens_from_words("   ").is_empty());
    }
}
