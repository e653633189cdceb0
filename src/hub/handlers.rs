//! Inbound command handlers
//!
//! Every handler has the same signature and is registered once in [`table`].
//! Handlers never fail: malformed input is logged at debug level and the
//! handler returns without sending anything.

use crate::hub::context::HubRole;
use crate::hub::events::{ChatMessage, DisconnectReason, HubEvent, NickError, UserCommand, UserCommandKind};
use crate::hub::nick_rule::NickRule;
use crate::hub::session::{clamp_search_interval, HubSession, HubSupports, State};
use crate::protocol::cipher::{is_extended, make_key, split_lock};
use crate::protocol::codec::unescape;
use crate::protocol::command::{ConnectRequest, OutCommand};
use crate::protocol::myinfo::MyInfo;
use crate::protocol::search::SearchKind;
use crate::users::UserFlags;
use log::debug;
use std::collections::HashMap;
use std::net::IpAddr;

/// One inbound command line
pub struct Line<'a> {
    /// Undecoded bytes, needed for `$Lock`
    pub raw: &'a [u8],
    pub text: &'a str,
    pub name: &'a str,
    pub param: &'a str,
    pub now: u64,
}

pub type Handler = fn(&HubSession, &Line<'_>);

/// Features we advertise to extended hubs
const SUPPORTS: &[&str] = &[
    "UserCommand",
    "NoGetINFO",
    "NoHello",
    "UserIP2",
    "TTHSearch",
    "HubURL",
    "NickRule",
    "SearchRule",
    "HubTopic",
    "TTHS",
];

/// Command name to handler
pub fn table() -> HashMap<&'static str, Handler> {
    let entries: [(&'static str, Handler); 29] = [
        ("Lock", lock),
        ("Hello", hello),
        ("Supports", supports),
        ("MyINFO", my_info),
        ("Quit", quit),
        ("ConnectToMe", connect_to_me),
        ("RevConnectToMe", rev_connect_to_me),
        ("SR", search_result),
        ("Search", search),
        ("SA", search_tth_active),
        ("SP", search_tth_passive),
        ("HubName", hub_name),
        ("HubTopic", hub_topic),
        ("LogedIn", logged_in),
        ("HubIsFull", hub_is_full),
        ("ForceMove", force_move),
        ("ValidateDenide", validate_denied),
        ("BadNick", bad_nick),
        ("UserIP", user_ip),
        ("BotList", bot_list),
        ("NickList", nick_list),
        ("OpList", op_list),
        ("To:", private_message),
        ("GetPass", get_pass),
        ("BadPass", bad_pass),
        ("GetHubURL", get_hub_url),
        ("UserCommand", user_command),
        ("SearchRule", search_rule),
        ("NickRule", nick_rule),
    ];
    entries.into_iter().collect()
}

// =============================================================================
// Login
// =============================================================================

fn lock(session: &HubSession, line: &Line<'_>) {
    let Some(param) = line.raw.get(b"$Lock ".len()..) else {
        return;
    };
    let lock = split_lock(param);
    if lock.is_empty() {
        return;
    }

    let nick = {
        let mut st = session.state.lock();
        if st.state != State::Protocol {
            debug!("{}: $Lock in state {:?} ignored", session.hub_url, st.state);
            return;
        }
        st.state = State::Identify;
        if let Some(retry) = st.retry_nick.take() {
            st.my_nick = retry;
        }
        st.my_nick.clone()
    };

    if is_extended(lock) {
        let mut features = SUPPORTS.to_vec();
        if session.broker.tls_ok() {
            features.push("TLS");
        }
        session.send(OutCommand::Supports(features));
    }
    session.send(OutCommand::Key(make_key(lock)));
    session
        .directory
        .get_or_create_with(&nick, session.context.my_cid());
    session.send(OutCommand::ValidateNick(nick));
}

fn hello(session: &HubSession, line: &Line<'_>) {
    let nick = line.param;
    if nick.is_empty() {
        return;
    }
    let my_nick = session.my_nick();
    if nick != my_nick {
        session.directory.get_or_create(nick);
        session.fire(HubEvent::UserUpdated(nick.to_string()));
        return;
    }

    let me = session
        .directory
        .get_or_create_with(nick, session.context.my_cid());
    let active = session.broker.is_active();
    me.update(|id| id.set_flag(UserFlags::PASSIVE, !active));

    let first_login = {
        let mut st = session.state.lock();
        if st.state != State::Identify {
            return;
        }
        st.state = State::Normal;
        !std::mem::replace(&mut st.logged_in_fired, true)
    };

    session.context.set_role(&session.hub_url, HubRole::Normal);
    session.send(OutCommand::Version);
    session.send(OutCommand::GetNickList);
    session.update_info(true, false, line.now);
    if first_login {
        session.fire(HubEvent::LoggedIn);
    }
}

fn supports(session: &HubSession, line: &Line<'_>) {
    let flags = HubSupports::parse(line.param);
    session.state.lock().supports |= flags;
}

fn get_pass(session: &HubSession, line: &Line<'_>) {
    let (nick, password) = {
        let mut st = session.state.lock();
        let salt = line.param.trim();
        st.salt = (!salt.is_empty()).then(|| salt.to_string());
        (st.my_nick.clone(), st.password.clone())
    };
    session
        .directory
        .get_or_create_with(&nick, session.context.my_cid());
    session.context.set_role(&session.hub_url, HubRole::Registered);

    if password.is_empty() {
        session.fire(HubEvent::GetPassword);
    } else {
        session.password(&password, false);
        session.fire(HubEvent::StatusMessage {
            text: "Stored password sent".to_string(),
            spam: false,
        });
    }
}

fn bad_pass(session: &HubSession, _line: &Line<'_>) {
    session.state.lock().password.clear();
    session.fire(HubEvent::BadPassword);
}

fn validate_denied(session: &HubSession, _line: &Line<'_>) {
    session.fire(HubEvent::NickError(NickError::Taken));
    session.next_nick_after_rejection();
    session.teardown(DisconnectReason::NickError(NickError::Taken));
}

fn bad_nick(session: &HubSession, line: &Line<'_>) {
    debug!("{}: $BadNick {}", session.hub_url, line.param);
    session.fire(HubEvent::NickError(NickError::Rejected));
    session.next_nick_after_rejection();
    session.teardown(DisconnectReason::NickError(NickError::Rejected));
}

fn force_move(session: &HubSession, line: &Line<'_>) {
    let target = unescape(line.param);
    session.set_auto_reconnect(false);
    session.fire(HubEvent::Redirect(target));
    session.teardown(DisconnectReason::Redirect);
}

fn nick_rule(session: &HubSession, line: &Line<'_>) {
    let rule = NickRule::parse(line.param);
    if rule.is_none() {
        debug!("{}: invalid $NickRule {}", session.hub_url, line.param);
    }
    session.state.lock().nick_rule = rule;
}

fn search_rule(session: &HubSession, line: &Line<'_>) {
    let mut st = session.state.lock();
    for rule in line.param.split("$$") {
        let Some((key, value)) = rule.split_once(' ') else {
            continue;
        };
        let secs = value.trim().parse::<u64>().unwrap_or(0);
        if secs == 0 {
            continue;
        }
        match key {
            "Int" => st.search_interval_ms = clamp_search_interval(secs * 1000),
            "IntPas" => st.search_interval_passive_ms = clamp_search_interval(secs * 1000),
            _ => {}
        }
    }
}

fn get_hub_url(session: &HubSession, _line: &Line<'_>) {
    session.send(OutCommand::MyHubUrl(session.hub_url.clone()));
}

// =============================================================================
// Hub info
// =============================================================================

fn hub_name(session: &HubSession, line: &Line<'_>) {
    let param = line.param.replace("\r\n", " ").replace('\n', " ");
    let (name, description) = match param.split_once(" - ") {
        Some((name, desc)) => (unescape(name), unescape(desc)),
        None => (unescape(&param), String::new()),
    };
    session.state.lock().hub_name = name.clone();
    session.fire(HubEvent::HubUpdated { name, description });
}

fn hub_topic(session: &HubSession, line: &Line<'_>) {
    if !line.param.is_empty() {
        session.fire(HubEvent::HubTopic(unescape(line.param)));
    }
}

fn logged_in(session: &HubSession, _line: &Line<'_>) {
    session.fire(HubEvent::OperatorLogin);
}

fn hub_is_full(session: &HubSession, _line: &Line<'_>) {
    session.fire(HubEvent::HubFull);
}

fn user_command(session: &HubSession, line: &Line<'_>) {
    let Some((code, rest)) = line.param.split_once(' ') else {
        return;
    };
    let Some(kind) = code.parse().ok().and_then(UserCommandKind::from_code) else {
        return;
    };
    let command = match kind {
        UserCommandKind::Separator | UserCommandKind::Clear => UserCommand {
            kind,
            context: rest.trim().parse().unwrap_or(0),
            name: String::new(),
            command: String::new(),
        },
        UserCommandKind::Raw | UserCommandKind::RawOnce => {
            let Some((context, body)) = rest.split_once(' ') else {
                return;
            };
            let Some((name, command)) = body.split_once('$') else {
                return;
            };
            UserCommand {
                kind,
                context: context.parse().unwrap_or(0),
                name: unescape(name).replace('/', "//").replace('\\', "/"),
                command: unescape(command),
            }
        }
    };
    session.fire(HubEvent::UserCommand(command));
}

// =============================================================================
// User list
// =============================================================================

fn my_info(session: &HubSession, line: &Line<'_>) {
    let Some(info) = MyInfo::parse(line.param) else {
        debug!("{}: bad $MyINFO {}", session.hub_url, line.param);
        return;
    };
    let user = session.directory.get_or_create(&info.nick);
    user.update(|id| id.apply_myinfo(&info));
    session.directory.change_bytes_shared(&user, info.share);
    session.fire(HubEvent::UserUpdated(info.nick));
}

fn quit(session: &HubSession, line: &Line<'_>) {
    let nick = line.param;
    if nick.is_empty() || nick == session.my_nick() {
        return;
    }
    if session.directory.remove(nick).is_some() {
        session.state.lock().mirrored.remove(nick);
        session.fire(HubEvent::UserRemoved(nick.to_string()));
    }
}

fn nick_list(session: &HubSession, line: &Line<'_>) {
    let nicks: Vec<&str> = line.param.split("$$").filter(|n| !n.is_empty()).collect();
    if nicks.is_empty() {
        return;
    }
    for nick in &nicks {
        session.directory.get_or_create(nick);
    }

    let (my_nick, supports) = {
        let st = session.state.lock();
        (st.my_nick.clone(), st.supports)
    };
    if !supports.contains(HubSupports::NO_GET_INFO) {
        for nick in &nicks {
            session.send(OutCommand::GetInfo {
                nick: nick.to_string(),
                my_nick: my_nick.clone(),
            });
        }
    }
    for nick in nicks {
        session.fire(HubEvent::UserUpdated(nick.to_string()));
    }
}

fn op_list(session: &HubSession, line: &Line<'_>) {
    let nicks: Vec<&str> = line.param.split("$$").filter(|n| !n.is_empty()).collect();
    if nicks.is_empty() {
        return;
    }
    let my_nick = session.my_nick();
    for nick in &nicks {
        let user = session.directory.get_or_create(nick);
        user.update(|id| id.set_flag(UserFlags::OPERATOR, true));
        if *nick == my_nick {
            session.context.set_role(&session.hub_url, HubRole::Operator);
        }
        session.fire(HubEvent::UserUpdated(nick.to_string()));
    }
    // op counts changed; re-announce
    session.update_info(false, false, line.now);
}

fn bot_list(session: &HubSession, line: &Line<'_>) {
    for nick in line.param.split("$$").filter(|n| !n.is_empty()) {
        let user = session.directory.get_or_create(nick);
        user.update(|id| id.set_flag(UserFlags::BOT, true));
        session.fire(HubEvent::UserUpdated(nick.to_string()));
    }
}

fn user_ip(session: &HubSession, line: &Line<'_>) {
    for entry in line.param.split("$$") {
        let Some((nick, ip)) = entry.split_once(' ') else {
            continue;
        };
        let Ok(ip) = ip.trim().parse::<IpAddr>() else {
            continue;
        };
        if let Some(user) = session.directory.find(nick) {
            user.update(|id| id.ip = Some(ip));
        }
    }
}

// =============================================================================
// Chat
// =============================================================================

/// Public chat and hub status lines
pub fn chat(session: &HubSession, raw: &str) {
    let line = unescape(raw);
    let lower = line.to_lowercase();

    if session.state() != State::Normal && lower.contains("banned") {
        debug!("{}: ban message, auto-reconnect disabled", session.hub_url);
        session.set_auto_reconnect(false);
    }

    let kick_spam = (lower.contains("hub-security") && lower.contains("was kicked by"))
        || (lower.contains("is kicking") && lower.contains("because:"));
    if kick_spam {
        session.fire(HubEvent::StatusMessage {
            text: line,
            spam: true,
        });
        return;
    }

    let (nick, text, third_person) = if let Some(rest) = line
        .strip_prefix("** ")
        .or_else(|| line.strip_prefix("* "))
    {
        match rest.split_once(' ') {
            Some((nick, text)) => (nick.to_string(), text.to_string(), true),
            None => (String::new(), String::new(), false),
        }
    } else if let Some(rest) = line.strip_prefix('<') {
        match rest.split_once("> ") {
            Some((_, "")) => return,
            Some((nick, text)) => (nick.to_string(), text.to_string(), false),
            None => (String::new(), String::new(), false),
        }
    } else {
        (String::new(), String::new(), false)
    };

    if nick.is_empty() {
        session.fire(HubEvent::StatusMessage {
            text: line,
            spam: false,
        });
        return;
    }

    let from_hub = session.directory.find(&nick).is_none();
    session.fire(HubEvent::Message(ChatMessage {
        from: nick,
        text: if from_hub { line } else { text },
        third_person,
        reply_to: None,
        from_hub,
    }));
}

/// `$To: <me> From: <reply-to> $<<from>> <text>`
fn private_message(session: &HubSession, line: &Line<'_>) {
    let param = line.param;
    let Some(pos) = param.find(" From: ") else {
        return;
    };
    let rest = &param[pos + 7..];
    let Some(pos) = rest.find(" $<") else {
        return;
    };
    let reply_to = &rest[..pos];
    let rest = &rest[pos + 3..];
    let Some(pos) = rest.find("> ") else {
        return;
    };
    let from = &rest[..pos];
    let text = &rest[pos + 2..];
    if reply_to.is_empty() || from.is_empty() || text.is_empty() {
        debug!("{}: malformed $To: {}", session.hub_url, param);
        return;
    }

    let from_hub = session.directory.find(from).is_none();
    let (text, third_person) = match text.strip_prefix("/me ") {
        Some(t) => (t, true),
        None => (text, false),
    };
    session.fire(HubEvent::Message(ChatMessage {
        from: from.to_string(),
        text: unescape(text),
        third_person,
        reply_to: Some(reply_to.to_string()),
        from_hub,
    }));
}

// =============================================================================
// Connect negotiation and search
// =============================================================================

fn connect_to_me(session: &HubSession, line: &Line<'_>) {
    match ConnectRequest::parse(line.param) {
        Some(req) => session.handle_incoming_connect_request(req, line.now),
        None => debug!("{}: bad $ConnectToMe {}", session.hub_url, line.param),
    }
}

fn rev_connect_to_me(session: &HubSession, line: &Line<'_>) {
    let Some((from, _to)) = line.param.split_once(' ') else {
        return;
    };
    session.handle_incoming_rev_connect(from, line.now);
}

fn search_result(session: &HubSession, line: &Line<'_>) {
    session.responder.on_search_result(line.text);
}

fn search(session: &HubSession, line: &Line<'_>) {
    session.handle_incoming_search(SearchKind::Search, line.param, line.now);
}

fn search_tth_active(session: &HubSession, line: &Line<'_>) {
    session.handle_incoming_search(SearchKind::TthActive, line.param, line.now);
}

fn search_tth_passive(session: &HubSession, line: &Line<'_>) {
    session.handle_incoming_search(SearchKind::TthPassive, line.param, line.now);
}
