#![allow(dead_code)]

use std::cell::RefCell;
use std::net::{IpAddr, Ipv4Addr};
use std::rc::Rc;
use tapir::config::Config;
use tapir::connection_parser::ConnectionParser;

/// Everything the hook surface reports, in firing order.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    TxStart,
    RequestLine,
    RequestHeaders,
    RequestBody(Vec<u8>),
    RequestTrailer,
    RequestComplete,
    ResponseLine,
    ResponseHeaders,
    ResponseBody(Vec<u8>),
    ResponseComplete,
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

/// A configuration with every interesting hook wired to an event log.
pub fn observed_config() -> (Config, EventLog) {
    let events: EventLog = Rc::new(RefCell::new(Vec::new()));
    let mut cfg = Config::new();

    let log = Rc::clone(&events);
    cfg.hook_transaction_start.register(move |_| {
        log.borrow_mut().push(Event::TxStart);
        Ok(())
    });
    let log = Rc::clone(&events);
    cfg.hook_request_line.register(move |_| {
        log.borrow_mut().push(Event::RequestLine);
        Ok(())
    });
    let log = Rc::clone(&events);
    cfg.hook_request_headers.register(move |_| {
        log.borrow_mut().push(Event::RequestHeaders);
        Ok(())
    });
    let log = Rc::clone(&events);
    cfg.hook_request_body_data.register(move |d| {
        if let Some(bytes) = d.data {
            if !bytes.is_empty() {
                log.borrow_mut().push(Event::RequestBody(bytes.to_vec()));
            }
        }
        Ok(())
    });
    let log = Rc::clone(&events);
    cfg.hook_request_trailer.register(move |_| {
        log.borrow_mut().push(Event::RequestTrailer);
        Ok(())
    });
    let log = Rc::clone(&events);
    cfg.hook_request_complete.register(move |_| {
        log.borrow_mut().push(Event::RequestComplete);
        Ok(())
    });
    let log = Rc::clone(&events);
    cfg.hook_response_line.register(move |_| {
        log.borrow_mut().push(Event::ResponseLine);
        Ok(())
    });
    let log = Rc::clone(&events);
    cfg.hook_response_headers.register(move |_| {
        log.borrow_mut().push(Event::ResponseHeaders);
        Ok(())
    });
    let log = Rc::clone(&events);
    cfg.hook_response_body_data.register(move |d| {
        if let Some(bytes) = d.data {
            if !bytes.is_empty() {
                log.borrow_mut().push(Event::ResponseBody(bytes.to_vec()));
            }
        }
        Ok(())
    });
    let log = Rc::clone(&events);
    cfg.hook_response_complete.register(move |_| {
        log.borrow_mut().push(Event::ResponseComplete);
        Ok(())
    });

    (cfg, events)
}

/// An open parser on 10.0.0.1:32768 -> 127.0.0.1:80.
pub fn open_parser(cfg: Config) -> ConnectionParser {
    let mut connp = ConnectionParser::new(cfg);
    connp.open(
        Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
        Some(32768),
        Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        Some(80),
        None,
    );
    connp
}

/// Collapses adjacent body events so event sequences can be compared
/// independently of how the input was chunked.
pub fn merge_body_events(events: &[Event]) -> Vec<Event> {
    let mut merged: Vec<Event> = Vec::new();
    for event in events {
        match (merged.last_mut(), event) {
            (Some(Event::RequestBody(acc)), Event::RequestBody(more)) => {
                acc.extend_from_slice(more)
            }
            (Some(Event::ResponseBody(acc)), Event::ResponseBody(more)) => {
                acc.extend_from_slice(more)
            }
            _ => merged.push(event.clone()),
        }
    }
    merged
}
