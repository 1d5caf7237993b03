use tracing::warn;

/// Largest message we accept; longer input is truncated.
pub(crate) const MAX_LINE: usize = 16_384;

/// Guard against octet-count accumulation overflow. The bound has no
/// protocol basis; it is kept for compatibility and pending review.
const MAX_OCTET_COUNT: usize = 200_000_000;

/// Per-listener framing selection.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FramingFlags {
    pub disable_lf_delim: bool,
    pub support_octet_framing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputState {
    AtFrameStart,
    InOctetCount,
    InMsg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramingMode {
    OctetStuffing,
    OctetCounting,
}

/// Incremental frame splitter for one connection. Bytes go in via
/// [`FrameParser::feed`], complete messages come out through the `submit`
/// callback. State survives across reads within a request; call
/// [`FrameParser::reset`] at each request start and
/// [`FrameParser::finish`] at its end.
pub(crate) struct FrameParser {
    state: InputState,
    framing: FramingMode,
    octets_remain: usize,
    msg: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        FrameParser {
            state: InputState::AtFrameStart,
            framing: FramingMode::OctetStuffing,
            octets_remain: 0,
            msg: Vec::with_capacity(MAX_LINE),
        }
    }

    pub fn reset(&mut self) {
        self.state = InputState::AtFrameStart;
        self.framing = FramingMode::OctetStuffing;
        self.octets_remain = 0;
        self.msg.clear();
    }

    pub fn feed(
        &mut self,
        flags: &FramingFlags,
        peer: &str,
        buf: &[u8],
        submit: &mut dyn FnMut(&[u8]),
    ) {
        if flags.disable_lf_delim {
            self.feed_blocks(buf, submit);
        } else if flags.support_octet_framing {
            self.feed_octet(flags, peer, buf, submit);
        } else {
            self.feed_lf(buf, submit);
        }
    }

    /// Submit whatever is left in the buffer at end of body.
    pub fn finish(&mut self, submit: &mut dyn FnMut(&[u8])) {
        self.emit(submit);
    }

    fn emit(&mut self, submit: &mut dyn FnMut(&[u8])) {
        if !self.msg.is_empty() {
            submit(&self.msg);
        }
        self.msg.clear();
    }

    /// Block-granular: every feed call flushes the buffer as one message.
    fn feed_blocks(&mut self, buf: &[u8], submit: &mut dyn FnMut(&[u8])) {
        let mut rest = buf;
        while !rest.is_empty() {
            let room = MAX_LINE - self.msg.len();
            let count = rest.len().min(room);
            self.msg.extend_from_slice(&rest[..count]);
            rest = &rest[count..];
            self.emit(submit);
        }
    }

    /// Default framing: LF terminates a message; a full buffer flushes
    /// early.
    fn feed_lf(&mut self, buf: &[u8], submit: &mut dyn FnMut(&[u8])) {
        for &ch in buf {
            if self.msg.len() < MAX_LINE {
                if ch == b'\n' {
                    self.emit(submit);
                } else {
                    self.msg.push(ch);
                }
            } else {
                self.emit(submit);
            }
        }
    }

    fn feed_octet(
        &mut self,
        flags: &FramingFlags,
        peer: &str,
        buf: &[u8],
        submit: &mut dyn FnMut(&[u8]),
    ) {
        let mut i = 0;
        while i < buf.len() {
            let ch = buf[i];
            match self.state {
                InputState::AtFrameStart | InputState::InOctetCount => {
                    self.process_count_char(flags, peer, ch);
                    // an octet-stuffed first byte is reprocessed as message
                    // payload, a counted one was consumed here
                    if self.framing == FramingMode::OctetCounting {
                        i += 1;
                    }
                }
                InputState::InMsg => match self.framing {
                    FramingMode::OctetStuffing => {
                        if self.msg.len() < MAX_LINE {
                            if ch == b'\n' {
                                self.emit(submit);
                                self.state = InputState::AtFrameStart;
                            } else {
                                self.msg.push(ch);
                            }
                        } else {
                            self.emit(submit);
                            self.state = InputState::AtFrameStart;
                        }
                        i += 1;
                    }
                    FramingMode::OctetCounting => {
                        let remaining = buf.len() - i;
                        let wanted = self.octets_remain.min(remaining);
                        let room = MAX_LINE - self.msg.len();
                        let copy = wanted.min(room);
                        if copy > 0 {
                            self.msg.extend_from_slice(&buf[i..i + copy]);
                        }
                        // payload past the line limit is dropped, the frame
                        // is consumed either way
                        i += wanted;
                        self.octets_remain -= wanted;
                        if self.octets_remain == 0 {
                            self.emit(submit);
                            self.state = InputState::AtFrameStart;
                        }
                    }
                },
            }
        }
    }

    fn process_count_char(&mut self, flags: &FramingFlags, peer: &str, ch: u8) {
        if self.state == InputState::AtFrameStart {
            if flags.support_octet_framing && ch.is_ascii_digit() {
                self.state = InputState::InOctetCount;
                self.octets_remain = 0;
                self.framing = FramingMode::OctetCounting;
            } else {
                self.state = InputState::InMsg;
                self.framing = FramingMode::OctetStuffing;
                return;
            }
        }

        if ch.is_ascii_digit() {
            if self.octets_remain <= MAX_OCTET_COUNT {
                self.octets_remain = self.octets_remain * 10 + (ch - b'0') as usize;
            }
            // the digits are stashed so a framing fallback could replay
            // them; they are cleared once the count is accepted
            if self.msg.len() + 1 < MAX_LINE {
                self.msg.push(ch);
            }
        } else {
            if ch != b' ' {
                warn!(
                    peer,
                    delimiter = ch,
                    "framing error in received message: delimiter is not SP"
                );
            }
            if self.octets_remain < 1 {
                warn!(peer, "framing error in received message: zero octet count");
            } else if self.octets_remain > MAX_LINE {
                warn!(
                    peer,
                    octets = self.octets_remain,
                    max = MAX_LINE,
                    "received oversize message, truncating"
                );
            }
            self.state = InputState::InMsg;
            self.msg.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(
        flags: &FramingFlags,
        chunks: &[&[u8]],
    ) -> Vec<String> {
        let mut parser = FrameParser::new();
        parser.reset();
        let mut out = Vec::new();
        let mut submit = |bytes: &[u8]| out.push(String::from_utf8_lossy(bytes).into_owned());
        for chunk in chunks {
            parser.feed(flags, "peer", chunk, &mut submit);
        }
        parser.finish(&mut submit);
        out
    }

    const LF: FramingFlags = FramingFlags {
        disable_lf_delim: false,
        support_octet_framing: false,
    };
    const OCTET: FramingFlags = FramingFlags {
        disable_lf_delim: false,
        support_octet_framing: true,
    };
    const BLOCK: FramingFlags = FramingFlags {
        disable_lf_delim: true,
        support_octet_framing: false,
    };

    #[test]
    fn lf_framing_splits_lines() {
        assert_eq!(collect(&LF, &[b"line1\nline2\n"]), vec!["line1", "line2"]);
    }

    #[test]
    fn lf_framing_submits_trailing_partial_line() {
        assert_eq!(collect(&LF, &[b"line1\npartial"]), vec!["line1", "partial"]);
    }

    #[test]
    fn lf_framing_across_chunk_boundaries() {
        assert_eq!(
            collect(&LF, &[b"li", b"ne1\nli", b"ne2\n"]),
            vec!["line1", "line2"]
        );
    }

    #[test]
    fn octet_counting_parses_consecutive_frames() {
        assert_eq!(
            collect(&OCTET, &[b"5 hello10 0123456789"]),
            vec!["hello", "0123456789"]
        );
    }

    #[test]
    fn octet_counting_across_chunk_boundaries() {
        assert_eq!(
            collect(&OCTET, &[b"11 hel", b"lo ", b"world5 abcde"]),
            vec!["hello world", "abcde"]
        );
    }

    #[test]
    fn octet_frames_may_contain_lf() {
        assert_eq!(collect(&OCTET, &[b"11 line1\nline2"]), vec!["line1\nline2"]);
    }

    #[test]
    fn non_digit_start_falls_back_to_octet_stuffing() {
        assert_eq!(
            collect(&OCTET, &[b"plain line\nanother\n"]),
            vec!["plain line", "another"]
        );
    }

    #[test]
    fn zero_octet_count_is_flagged_and_skipped() {
        // the zero-length frame is discarded, the next one still parses
        assert_eq!(collect(&OCTET, &[b"0 5 hello"]), vec!["hello"]);
    }

    #[test]
    fn oversize_octet_count_truncates_but_submits() {
        let count = MAX_LINE + 100;
        let mut body = format!("{count} ").into_bytes();
        body.extend(std::iter::repeat(b'x').take(count));
        body.extend_from_slice(b"5 after");
        let msgs = collect(&OCTET, &[body.as_slice()]);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].len(), MAX_LINE);
        // the frame boundary stays intact after the truncated frame
        assert_eq!(msgs[1], "after");
    }

    #[test]
    fn block_mode_submits_each_read() {
        assert_eq!(
            collect(&BLOCK, &[b"chunk one", b"chunk two"]),
            vec!["chunk one", "chunk two"]
        );
    }

    #[test]
    fn block_mode_splits_oversize_reads() {
        let big = vec![b'a'; MAX_LINE + 10];
        let msgs = collect(&BLOCK, &[big.as_slice()]);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].len(), MAX_LINE);
        assert_eq!(msgs[1].len(), 10);
    }

    #[test]
    fn reset_clears_parse_state_between_requests() {
        let mut parser = FrameParser::new();
        let mut out: Vec<String> = Vec::new();
        let mut submit = |bytes: &[u8]| out.push(String::from_utf8_lossy(bytes).into_owned());
        parser.feed(&OCTET, "peer", b"10 only-fiv", &mut submit);
        parser.reset();
        parser.feed(&OCTET, "peer", b"3 abc", &mut submit);
        parser.finish(&mut submit);
        assert_eq!(out, vec!["abc"]);
    }
}
