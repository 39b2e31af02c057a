//! Worker transport client (`hashprobe worker PORT HOST`)
//!
//! Reads one probe body per stdin line, sends it to the victim as an HTTP
//! POST over a single keep-alive connection and prints the elapsed time to
//! the first response byte, in nanoseconds, one line per request.
//!
//! Everything but the last request byte is written before the clock starts,
//! so the measurement covers the victim's processing rather than the upload.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Instant;

use anyhow::{bail, Context, Result};

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// HTTP framing of one probe body
pub fn frame_request(body: &str) -> Vec<u8> {
    let mut request = format!("POST / HTTP/1.1\r\nContent-Length:{}\r\n\r\n", body.len()).into_bytes();
    request.extend_from_slice(body.as_bytes());
    request.extend_from_slice(b"\r\n");
    request
}

/// How the rest of a response after its head is delimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    Length(usize),
    Chunked,
    None,
}

fn body_framing(head: &[u8]) -> BodyFraming {
    let text = String::from_utf8_lossy(head);
    let mut framing = BodyFraming::None;

    for line in text.split("\r\n").skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            return BodyFraming::Chunked;
        }
        if name.eq_ignore_ascii_case("content-length") {
            if let Ok(len) = value.parse() {
                framing = BodyFraming::Length(len);
            }
        }
    }
    framing
}

/// Timed HTTP client over one connection
#[derive(Debug)]
pub struct TimedClient<S: Read + Write> {
    reader: BufReader<S>,
}

impl TimedClient<TcpStream> {
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .with_context(|| format!("Failed to connect to {}:{}", host, port))?;
        stream
            .set_nodelay(true)
            .context("Failed to disable Nagle's algorithm")?;
        Ok(Self::new(stream))
    }
}

impl<S: Read + Write> TimedClient<S> {
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::new(stream),
        }
    }

    /// Send one body and return nanoseconds until the first response byte
    ///
    /// The full response is consumed before returning so the connection is
    /// ready for the next request.
    pub fn time_request(&mut self, body: &str) -> io::Result<f64> {
        let request = frame_request(body);
        let (head, last) = request.split_at(request.len() - 1);

        let stream = self.reader.get_mut();
        stream.write_all(head)?;
        stream.flush()?;

        let start = Instant::now();
        stream.write_all(last)?;
        stream.flush()?;

        let mut first = [0u8; 1];
        self.reader.read_exact(&mut first)?;
        let elapsed = start.elapsed().as_nanos() as f64;

        self.drain_response(first[0])?;
        Ok(elapsed)
    }

    fn drain_response(&mut self, first: u8) -> io::Result<()> {
        let mut head = vec![first];
        let mut byte = [0u8; 1];
        while !head.ends_with(HEAD_TERMINATOR) {
            self.reader.read_exact(&mut byte)?;
            head.push(byte[0]);
        }

        match body_framing(&head) {
            BodyFraming::None => Ok(()),
            BodyFraming::Length(len) => {
                io::copy(&mut (&mut self.reader).take(len as u64), &mut io::sink())?;
                Ok(())
            }
            BodyFraming::Chunked => self.drain_chunks(),
        }
    }

    fn drain_chunks(&mut self) -> io::Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            let size_field = line.trim().split(';').next().unwrap_or("");
            let size = usize::from_str_radix(size_field, 16).map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bad chunk size {:?}", size_field),
                )
            })?;

            if size == 0 {
                // trailers end with an empty line
                loop {
                    line.clear();
                    if self.reader.read_line(&mut line)? == 0 || line.trim().is_empty() {
                        return Ok(());
                    }
                }
            }

            // chunk data plus its CRLF
            io::copy(
                &mut (&mut self.reader).take(size as u64 + 2),
                &mut io::sink(),
            )?;
        }
    }
}

/// Serve newline-delimited bodies from `input`, writing one timing per line
///
/// Returns the number of requests served. Any transport error ends the loop
/// with an error so the parent pipeline can respawn the worker.
pub fn run_worker<S, R, W>(client: &mut TimedClient<S>, input: R, mut output: W) -> Result<usize>
where
    S: Read + Write,
    R: BufRead,
    W: Write,
{
    let mut served = 0;
    for line in input.lines() {
        let body = line.context("Failed to read probe body")?;
        let body = body.strip_suffix('\r').unwrap_or(&body);
        if body.is_empty() {
            bail!("Empty probe body on line {}", served + 1);
        }

        let elapsed = client
            .time_request(body)
            .with_context(|| format!("Request {} failed", served + 1))?;

        writeln!(output, "{:.6}", elapsed)?;
        output.flush()?;
        served += 1;
    }
    Ok(served)
}

/// Entry point of the `worker` subcommand
pub fn serve_stdio(port: u16, host: &str) -> Result<()> {
    let mut client = TimedClient::connect(host, port)?;
    let stdin = io::stdin();
    let stdout = io::stdout();

    let served = run_worker(&mut client, stdin.lock(), stdout.lock())?;
    tracing::debug!(served, "worker input closed");
    Ok(())
}
