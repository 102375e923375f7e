use crate::error::StoreError;
use bytes::Bytes;
use redis_protocol::resp2::types::BytesFrame;

/// Build a RESP2 command: an Array of bulk strings.
pub fn command<I, A>(args: I) -> BytesFrame
where
    I: IntoIterator<Item = A>,
    A: Into<Bytes>,
{
    BytesFrame::Array(
        args.into_iter()
            .map(|arg| BytesFrame::BulkString(arg.into()))
            .collect(),
    )
}

/// Turn a server error frame into a `StoreError`, pass everything else through.
pub fn check(reply: BytesFrame) -> Result<BytesFrame, StoreError> {
    match reply {
        BytesFrame::Error(msg) => Err(StoreError::Reply(msg.to_string())),
        other => Ok(other),
    }
}

/// `+OK` (or any simple string) for SET.
pub fn expect_ok(reply: BytesFrame) -> Result<(), StoreError> {
    match check(reply)? {
        BytesFrame::SimpleString(_) => Ok(()),
        other => Err(unexpected("SET", &other)),
    }
}

/// Integer reply for DEL.
pub fn expect_integer(reply: BytesFrame) -> Result<i64, StoreError> {
    match check(reply)? {
        BytesFrame::Integer(n) => Ok(n),
        other => Err(unexpected("DEL", &other)),
    }
}

/// Bulk string or null reply for GET.
pub fn expect_bulk(reply: BytesFrame) -> Result<Option<Bytes>, StoreError> {
    match check(reply)? {
        BytesFrame::BulkString(b) => Ok(Some(b)),
        BytesFrame::Null => Ok(None),
        other => Err(unexpected("GET", &other)),
    }
}

/// Array of bulk strings for KEYS.
pub fn expect_strings(reply: BytesFrame) -> Result<Vec<String>, StoreError> {
    match check(reply)? {
        BytesFrame::Array(items) => items
            .iter()
            .map(|item| match item {
                BytesFrame::BulkString(b) | BytesFrame::SimpleString(b) => {
                    Ok(String::from_utf8_lossy(b).into_owned())
                }
                other => Err(unexpected("KEYS", other)),
            })
            .collect(),
        other => Err(unexpected("KEYS", &other)),
    }
}

fn unexpected(cmd: &str, frame: &BytesFrame) -> StoreError {
    StoreError::Reply(format!("{cmd}: {frame:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_array_of_bulk_strings() {
        let frame = command(["GET", "tagcache:GET:/a"]);
        match frame {
            BytesFrame::Array(args) => {
                assert_eq!(args.len(), 2);
                assert_eq!(args[0], BytesFrame::BulkString(Bytes::from_static(b"GET")));
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn server_errors_become_reply_errors() {
        let err = expect_ok(BytesFrame::Error("ERR nope".into())).unwrap_err();
        assert!(matches!(err, StoreError::Reply(msg) if msg == "ERR nope"));
    }

    #[test]
    fn get_reply_shapes() {
        assert_eq!(expect_bulk(BytesFrame::Null).unwrap(), None);
        assert_eq!(
            expect_bulk(BytesFrame::BulkString(Bytes::from_static(b"x"))).unwrap(),
            Some(Bytes::from_static(b"x"))
        );
        assert!(expect_bulk(BytesFrame::Integer(1)).is_err());
    }
}
