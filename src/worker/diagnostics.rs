use std::io::{self, BufRead, BufReader, Read};
use std::thread::{self, JoinHandle};

use log::debug;

/// Longest line handed over in one piece. Longer runs are split.
pub const MAX_LINE_LEN: usize = 16 * 1024;

/// Reads `reader` to the end, handing every non-empty line to `on_line`.
///
/// `\n`, `\r` and `\r\n` all terminate a line, since ffmpeg rewrites its
/// status line with bare carriage returns. Bytes are decoded as UTF-8, lossily.
/// A run without terminators is delivered every [`MAX_LINE_LEN`] bytes.
pub fn split_lines<R: Read>(reader: R, mut on_line: impl FnMut(String)) {
    let mut reader = BufReader::new(reader);
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let consumed = match reader.fill_buf() {
            Ok([]) => break,
            Ok(buf) => {
                for &byte in buf {
                    if byte == b'\n' || byte == b'\r' {
                        if !pending.is_empty() {
                            on_line(String::from_utf8_lossy(&pending).into_owned());
                            pending.clear();
                        }
                    } else {
                        pending.push(byte);
                        if pending.len() >= MAX_LINE_LEN {
                            on_line(String::from_utf8_lossy(&pending).into_owned());
                            pending.clear();
                        }
                    }
                }
                buf.len()
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Diagnostic stream read failed: {}", e);
                break;
            }
        };
        reader.consume(consumed);
    }

    if !pending.is_empty() {
        on_line(String::from_utf8_lossy(&pending).into_owned());
    }
}

/// Drains a child's diagnostic stream on its own thread.
pub(crate) fn spawn_diagnostics_drain<R, F>(reader: R, on_line: F) -> JoinHandle<()>
where
    R: Read + Send + 'static,
    F: FnMut(String) + Send + 'static,
{
    thread::spawn(move || {
        split_lines(reader, on_line);
        debug!("Diagnostic stream closed.");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn collect(input: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        split_lines(Cursor::new(input.to_vec()), |line| lines.push(line));
        lines
    }

    #[test]
    fn splits_on_all_terminators() {
        assert_eq!(
            collect(b"Duration: 00:00:10.00\nframe=1 time=00:00:01.00 \rframe=2 time=00:00:02.00 \r\nlast"),
            vec![
                "Duration: 00:00:10.00",
                "frame=1 time=00:00:01.00 ",
                "frame=2 time=00:00:02.00 ",
                "last",
            ]
        );
    }

    #[test]
    fn skips_blank_lines() {
        assert_eq!(collect(b"\n\r\n  \nboom\n\n"), vec!["  ", "boom"]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        assert_eq!(collect(b"caf\xe9\n"), vec!["caf\u{fffd}"]);
    }

    #[test]
    fn unterminated_output_is_split_at_the_cap() {
        let mut input = vec![b'a'; MAX_LINE_LEN * 2 + 10];
        input.push(b'\n');
        let lines = collect(&input);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), MAX_LINE_LEN);
        assert_eq!(lines[1].len(), MAX_LINE_LEN);
        assert_eq!(lines[2].len(), 10);
    }

    #[test]
    fn drain_thread_delivers_in_order() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = spawn_diagnostics_drain(Cursor::new(b"a\nb\nc".to_vec()), move |line| {
            tx.send(line).unwrap();
        });
        handle.join().unwrap();
        let lines: Vec<String> = rx.try_iter().collect();
        assert_eq!(lines, vec!["a", "b", "c"]);
    }
}
