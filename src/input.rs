//! Newline-delimited message input.

use std::io::{self, BufRead};

use sinkline_core::Message;
use sinkline_delivery::MessageQueue;
use tracing::{debug, warn};

/// Submits every non-empty line of `reader` as a message.
///
/// Blocks while the queue is at capacity and stops early once the queue is
/// closed, leaving the rest of the input unread. Lines need not be valid UTF-8; a trailing `\r` is stripped.
/// Returns the number of messages submitted.
pub fn submit_lines<R: BufRead>(reader: R, queue: &dyn MessageQueue) -> io::Result<usize> {
    let mut submitted = 0;
    for line in reader.split(b'\n') {
        let mut line = line?;
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.is_empty() {
            continue;
        }

        match queue.push_back(Message::new(line)) {
            Ok(()) => submitted += 1,
            Err(error) => {
                warn!(submitted, error = %error, "input no longer read");
                break;
            },
        }
    }
    debug!(submitted, "input finished");
    Ok(submitted)
}
