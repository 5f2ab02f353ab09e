//! Per-connection state, sized and aligned to avoid false sharing across
//! CPU cores. Grounded directly on `chopin/src/conn.rs`; extended with two
//! states (`AwaitingCache`, `AwaitingTask`) used while the dispatcher is
//! blocked on an L2/L3 cache probe or a `BackgroundTaskHandle::wait` call
//! from within a handler (spec §5's suspension points).

pub const READ_BUF_SIZE: usize = 8192;
pub const WRITE_BUF_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnState {
    Free = 0,
    Accepted = 1,
    Reading = 2,
    Parsing = 3,
    Routing = 4,
    Handling = 5,
    AwaitingCache = 6,
    AwaitingTask = 7,
    Writing = 8,
    Closing = 9,
}

impl Default for ConnState {
    fn default() -> Self {
        ConnState::Free
    }
}

// 64-byte aligned struct avoiding false sharing and fitting cache lines.
#[repr(C, align(64))]
pub struct Conn {
    pub fd: i32,
    pub state: ConnState,
    pub parse_pos: u32,
    pub write_pos: u32,
    pub route_id: u16,
    pub last_active: u32,
    pub requests_served: u32,
    pub keep_alive: bool,

    pub read_buf: [u8; READ_BUF_SIZE],
    pub write_buf: [u8; WRITE_BUF_SIZE],
}

impl Conn {
    pub fn empty() -> Self {
        Self {
            fd: -1,
            state: ConnState::Free,
            parse_pos: 0,
            write_pos: 0,
            route_id: 0,
            last_active: 0,
            requests_served: 0,
            keep_alive: false,
            read_buf: [0; READ_BUF_SIZE],
            write_buf: [0; WRITE_BUF_SIZE],
        }
    }
}

impl Default for Conn {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_conn_alignment() {
        assert_eq!(std::mem::align_of::<Conn>(), 64);
        assert_eq!(std::mem::size_of::<Conn>() % 64, 0);
    }

    #[test]
    fn fresh_connection_is_free() {
        let conn = Conn::empty();
        assert_eq!(conn.state, ConnState::Free);
        assert_eq!(conn.fd, -1);
    }
}
