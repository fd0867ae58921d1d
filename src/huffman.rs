//! Huffman coding over the restricted message alphabet.
//!
//! The alphabet is newline, the printable ASCII ranges 0x20–0x5A and
//! 0x61–0x7A, plus a distinguished end-of-stream symbol (0x03) that is
//! appended to every compressed stream in place of a length header. The code
//! table is trained once from a corpus, persisted, and shared verbatim by
//! encoder and decoder.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::fs;
use std::path::Path;

use crate::error::{BmsError, Result};
use crate::types::DataBits;

/// End-of-stream marker symbol (ETX). Terminates every compressed stream.
pub const EOF_SYMBOL: u8 = 0x03;

/// Frequency distribution over alphabet symbols.
pub type FreqMap = BTreeMap<u8, u64>;

/// Whether a byte belongs to the restricted message alphabet.
///
/// The EoF marker is deliberately not part of the alphabet: it can never
/// appear in filtered payload text, so its codeword unambiguously terminates
/// a stream.
pub fn is_in_alphabet(byte: u8) -> bool {
    matches!(byte, 0x0A | 0x20..=0x5A | 0x61..=0x7A)
}

/// Strips every byte outside the restricted alphabet.
pub fn filter_alphabet(data: &[u8]) -> Vec<u8> {
    data.iter().copied().filter(|&b| is_in_alphabet(b)).collect()
}

/// Counts symbol occurrences.
pub fn compute_frequencies(data: &[u8]) -> FreqMap {
    let mut frequencies = FreqMap::new();
    for &byte in data {
        *frequencies.entry(byte).or_insert(0) += 1;
    }
    frequencies
}

/// Huffman tree node, held in an arena and linked by index.
enum Node {
    Leaf { symbol: u8 },
    Internal { left: usize, right: usize },
}

/// Bijective symbol ↔ codeword table.
#[derive(Clone, Debug, Default)]
pub struct HuffmanCode {
    encode: BTreeMap<u8, DataBits>,
    decode: HashMap<DataBits, u8>,
    max_codeword_len: usize,
}

impl HuffmanCode {
    /// Builds the code table from a frequency distribution.
    ///
    /// Ties between equal frequencies are broken by insertion order (symbols
    /// in ascending byte order first, merged nodes in creation order), so a
    /// given distribution always produces the same table.
    pub fn generate(frequencies: &FreqMap) -> Self {
        let mut arena: Vec<Node> = Vec::with_capacity(2 * frequencies.len());
        let mut heap: BinaryHeap<Reverse<(u64, usize)>> = BinaryHeap::new();

        for (&symbol, &freq) in frequencies {
            heap.push(Reverse((freq, arena.len())));
            arena.push(Node::Leaf { symbol });
        }

        while heap.len() > 1 {
            let Reverse((freq_left, left)) = heap.pop().expect("heap checked non-empty");
            let Reverse((freq_right, right)) = heap.pop().expect("heap checked non-empty");

            heap.push(Reverse((freq_left + freq_right, arena.len())));
            arena.push(Node::Internal { left, right });
        }

        let mut code = HuffmanCode::default();
        if let Some(Reverse((_, root))) = heap.pop() {
            code.assign(&arena, root, DataBits::new());
        }
        code
    }

    fn assign(&mut self, arena: &[Node], idx: usize, prefix: DataBits) {
        match arena[idx] {
            Node::Leaf { symbol } => {
                self.max_codeword_len = self.max_codeword_len.max(prefix.len());
                self.decode.insert(prefix.clone(), symbol);
                self.encode.insert(symbol, prefix);
            }
            Node::Internal { left, right } => {
                let mut left_prefix = prefix.clone();
                left_prefix.push(false);
                self.assign(arena, left, left_prefix);

                let mut right_prefix = prefix;
                right_prefix.push(true);
                self.assign(arena, right, right_prefix);
            }
        }
    }

    /// Number of symbols in the table.
    pub fn len(&self) -> usize {
        self.encode.len()
    }

    /// Whether the table holds no symbols.
    pub fn is_empty(&self) -> bool {
        self.encode.is_empty()
    }

    /// The codeword for a symbol, if the table knows it.
    pub fn codeword(&self, symbol: u8) -> Option<&DataBits> {
        self.encode.get(&symbol)
    }

    /// Compresses filtered payload bytes, terminating with the EoF codeword.
    pub fn compress(&self, data: &[u8]) -> Result<DataBits> {
        let mut bits = DataBits::new();

        for &byte in data.iter().chain(std::iter::once(&EOF_SYMBOL)) {
            let codeword = self.encode.get(&byte).ok_or_else(|| {
                BmsError::ChannelDecode(format!("no codeword for symbol 0x{byte:02x}"))
            })?;
            bits.extend_from_slice(codeword);
        }

        Ok(bits)
    }

    /// Decompresses a bit stream up to and excluding its EoF symbol.
    ///
    /// Trailing bits after EoF (channel padding) are discarded. A stream
    /// that ends without EoF, or accumulates a prefix longer than every
    /// codeword, is rejected.
    pub fn decompress(&self, bits: &[bool]) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut prefix = DataBits::new();

        for &bit in bits {
            prefix.push(bit);

            if prefix.len() > self.max_codeword_len {
                return Err(BmsError::ChannelDecode(
                    "bit stream is not a codeword sequence".into(),
                ));
            }

            if let Some(&symbol) = self.decode.get(&prefix) {
                if symbol == EOF_SYMBOL {
                    return Ok(data);
                }
                data.push(symbol);
                prefix.clear();
            }
        }

        Err(BmsError::ChannelDecode(
            "bit stream ended before the EoF symbol".into(),
        ))
    }

    /// Persists the table as a bincode archive.
    pub fn save(&self, path: &Path) -> Result<()> {
        let archive =
            bincode::serialize(&self.encode).map_err(|e| BmsError::Config(e.to_string()))?;
        fs::write(path, archive)?;
        Ok(())
    }

    /// Loads a table persisted with [`HuffmanCode::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let archive = fs::read(path)?;
        let encode: BTreeMap<u8, DataBits> =
            bincode::deserialize(&archive).map_err(|e| BmsError::Config(e.to_string()))?;

        let mut code = HuffmanCode::default();
        for (symbol, codeword) in encode {
            code.max_codeword_len = code.max_codeword_len.max(codeword.len());
            code.decode.insert(codeword.clone(), symbol);
            code.encode.insert(symbol, codeword);
        }
        Ok(code)
    }
}

/// Table over a training text containing every alphabet symbol at least
/// once, so tests can encode arbitrary filtered payloads.
#[cfg(test)]
pub(crate) fn full_alphabet_table() -> HuffmanCode {
    let mut corpus: Vec<u8> = (0x20..=0x5A).chain(0x61..=0x7A).collect();
    corpus.push(0x0A);
    corpus.extend_from_slice(b"the quick brown fox jumps over the lazy dog 0123456789");

    let mut frequencies = compute_frequencies(&corpus);
    *frequencies.entry(EOF_SYMBOL).or_insert(0) += 1;
    HuffmanCode::generate(&frequencies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_filter_keeps_only_alphabet() {
        let input = b"Hello\x00 World\x09!\x0Agoodbye\x7F";
        let filtered = filter_alphabet(input);
        assert_eq!(filtered, b"Hello World!\ngoodbye");
        assert!(filtered.iter().all(|&b| is_in_alphabet(b)));
    }

    #[test]
    fn eof_symbol_is_filtered() {
        assert!(!is_in_alphabet(EOF_SYMBOL));
        assert_eq!(filter_alphabet(&[EOF_SYMBOL, b'a']), b"a");
    }

    #[test]
    fn code_generation_gophers() {
        let frequencies = compute_frequencies(b"go go gophers");
        let code = HuffmanCode::generate(&frequencies);

        assert_eq!(code.len(), 8);
        assert_eq!(code.codeword(b'g').unwrap().len(), 2);
        assert_eq!(code.codeword(b'e').unwrap().len(), 4);
    }

    #[test]
    fn generation_is_deterministic() {
        let frequencies = compute_frequencies(b"go go gophers");
        let a = HuffmanCode::generate(&frequencies);
        let b = HuffmanCode::generate(&frequencies);
        assert_eq!(a.encode, b.encode);
    }

    #[test]
    fn compress_decompress_round_trip() {
        let code = full_alphabet_table();
        let text = b"This is some arbitrary TestdataX";

        assert_eq!(filter_alphabet(text), text);
        let bits = code.compress(text).unwrap();
        assert_eq!(code.decompress(&bits).unwrap(), text);
    }

    #[test]
    fn trailing_padding_is_discarded() {
        let code = full_alphabet_table();
        let mut bits = code.compress(b"some text").unwrap();
        bits.extend(vec![false; 17]);
        assert_eq!(code.decompress(&bits).unwrap(), b"some text");
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let code = full_alphabet_table();
        let bits = code.compress(b"some text").unwrap();
        assert!(code.decompress(&bits[..bits.len() - 4]).is_err());
    }

    #[test]
    fn table_round_trips_through_disk() {
        let code = full_alphabet_table();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huffcode.map");

        code.save(&path).unwrap();
        let loaded = HuffmanCode::load(&path).unwrap();

        let bits = code.compress(b"persisted table").unwrap();
        assert_eq!(loaded.decompress(&bits).unwrap(), b"persisted table");
    }
}
