//! Mock LwM2M binary for integration testing
//!
//! Stands in for the server, client and bootstrap-server example CLIs. It
//! prints the same prompt, packet, registration, payload and notification
//! text as the real binaries, so the harness can be exercised over a real
//! PTY without building the C stack. Commands are read line by line from
//! stdin; asynchronous events come from a background ticker thread.

use clap::{Parser, ValueEnum};
use serde_json::{json, Map, Value};
use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MockRole {
    Server,
    Client,
    BootstrapServer,
}

#[derive(Parser)]
#[command(name = "mock_lwm2m")]
struct Args {
    #[arg(long, value_enum, default_value = "server")]
    role: MockRole,

    /// Server: announce a client registration after this many milliseconds
    #[arg(long)]
    register_after_ms: Option<u64>,

    /// Server: announce a registration update at this interval
    #[arg(long)]
    update_every_ms: Option<u64>,

    /// Server: interval between notifications of an observed path
    #[arg(long, default_value = "200")]
    notify_every_ms: u64,

    /// Bootstrap server: run a bootstrap exchange after this many milliseconds
    #[arg(long)]
    bootstrap_after_ms: Option<u64>,

    /// Exit without being asked after this many milliseconds
    #[arg(long)]
    exit_after_ms: Option<u64>,

    /// Client: bootstrap instead of registering
    #[arg(short = 'b')]
    bootstrap: bool,

    /// Endpoint name
    #[arg(short = 'n', default_value = "testlwm2mclient")]
    name: String,
}

const PROMPT: &str = "\r\n> ";

/// Write a block of output in one go
fn emit(text: &str) {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    out.write_all(text.as_bytes()).ok();
    out.flush().ok();
}

// === Object model ===

#[derive(Clone)]
enum Res {
    Str(String),
    Int(i64),
    Bool(bool),
    Multi(Vec<i64>),
}

fn object_resources(object: u16) -> Option<Vec<(u16, Res)>> {
    match object {
        1 => Some(vec![
            (0, Res::Int(123)),
            (1, Res::Int(300)),
            (2, Res::Int(0)),
            (3, Res::Int(0)),
            (5, Res::Int(0)),
            (6, Res::Bool(false)),
            (7, Res::Str("U".to_string())),
        ]),
        3 => {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(1);
            Some(vec![
                (0, Res::Str("Open Mobile Alliance".to_string())),
                (1, Res::Str("Lightweight M2M Client".to_string())),
                (2, Res::Str("345000123".to_string())),
                (3, Res::Str("1.0".to_string())),
                (6, Res::Multi(vec![1, 5])),
                (7, Res::Multi(vec![3800, 5000])),
                (8, Res::Multi(vec![125, 900])),
                (9, Res::Int(100)),
                (10, Res::Int(15)),
                (11, Res::Multi(vec![0])),
                (13, Res::Int(now)),
                (14, Res::Str("+01:00".to_string())),
                (15, Res::Str("Europe/Berlin".to_string())),
                (16, Res::Str("U".to_string())),
            ])
        }
        _ => None,
    }
}

/// What a read of `path` covers
enum Target {
    Object(Vec<(u16, Res)>),
    Instance(Vec<(u16, Res)>),
    Resource(u16, Res),
}

fn resolve(path: &str) -> Option<Target> {
    let segments: Vec<u16> = path
        .trim_matches('/')
        .split('/')
        .map(|s| s.parse().ok())
        .collect::<Option<_>>()?;
    let resources = object_resources(*segments.first()?)?;
    match &segments[1..] {
        [] => Some(Target::Object(resources)),
        [0] => Some(Target::Instance(resources)),
        [0, id] => resources
            .into_iter()
            .find(|(rid, _)| rid == id)
            .map(|(rid, res)| Target::Resource(rid, res)),
        _ => None,
    }
}

// === Payload renderers ===

fn senml_entry(name: String, value: Value, label: &str) -> Map<String, Value> {
    let mut entry = Map::new();
    if !name.is_empty() {
        entry.insert("n".to_string(), Value::String(name));
    }
    entry.insert(label.to_string(), value);
    entry
}

/// (name, value, SenML label) triples relative to the base name
fn flatten(prefix: &str, resources: &[(u16, Res)]) -> Vec<(String, Value, &'static str)> {
    let mut out = Vec::new();
    for (id, res) in resources {
        let name = format!("{}{}", prefix, id);
        match res {
            Res::Str(s) => out.push((name, json!(s), "vs")),
            Res::Int(i) => out.push((name, json!(i), "v")),
            Res::Bool(b) => out.push((name, json!(b), "vb")),
            Res::Multi(values) => {
                for (i, v) in values.iter().enumerate() {
                    out.push((format!("{}/{}", name, i), json!(v), "v"));
                }
            }
        }
    }
    out
}

fn entries_for(path: &str, target: &Target) -> (String, Vec<(String, Value, &'static str)>) {
    let base = path.trim_end_matches('/');
    match target {
        Target::Object(resources) => (format!("{}/", base), flatten("0/", resources)),
        Target::Instance(resources) => (format!("{}/", base), flatten("", resources)),
        Target::Resource(_, Res::Multi(values)) => (
            format!("{}/", base),
            values
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), json!(v), "v"))
                .collect(),
        ),
        Target::Resource(id, res) => {
            let mut entries = flatten("", &[(*id, res.clone())]);
            for entry in &mut entries {
                entry.0.clear();
            }
            (base.to_string(), entries)
        }
    }
}

fn senml(path: &str, target: &Target) -> String {
    let (bn, entries) = entries_for(path, target);
    let records: Vec<Value> = entries
        .into_iter()
        .enumerate()
        .map(|(i, (name, value, label))| {
            let mut entry = senml_entry(name, value, label);
            if i == 0 {
                entry.insert("bn".to_string(), Value::String(bn.clone()));
            }
            Value::Object(entry)
        })
        .collect();
    Value::Array(records).to_string()
}

fn lwm2m_json(path: &str, target: &Target) -> String {
    let (bn, entries) = entries_for(path, target);
    let e: Vec<Value> = entries
        .into_iter()
        .map(|(name, value, label)| {
            let label = match label {
                "vs" => "sv",
                "vb" => "bv",
                other => other,
            };
            Value::Object(senml_entry(name, value, label))
        })
        .collect();
    json!({ "bn": bn, "e": e }).to_string()
}

fn indent(level: usize) -> String {
    "    ".repeat(level)
}

/// Hex+ASCII dump, 16 bytes per line
fn dump(bytes: &[u8], level: usize) -> String {
    let mut out = String::new();
    if bytes.is_empty() {
        out.push('\n');
    }
    for chunk in bytes.chunks(16) {
        out.push_str(&indent(level));
        let mut j = 0;
        for byte in chunk {
            out.push_str(&format!("{:02X} ", byte));
            if j % 4 == 3 {
                out.push(' ');
            }
            j += 1;
        }
        if bytes.len() > 16 {
            while j < 16 {
                out.push_str("   ");
                if j % 4 == 3 {
                    out.push(' ');
                }
                j += 1;
            }
        }
        out.push(' ');
        for byte in chunk {
            let c = *byte as char;
            out.push(if c.is_ascii_graphic() || c == ' ' { c } else { '.' });
        }
        out.push('\n');
    }
    out
}

fn int_bytes(value: i64) -> Vec<u8> {
    let width = if i8::try_from(value).is_ok() {
        1
    } else if i16::try_from(value).is_ok() {
        2
    } else if i32::try_from(value).is_ok() {
        4
    } else {
        8
    };
    value.to_be_bytes()[8 - width..].to_vec()
}

fn tlv_value(level: usize, id: u16, bytes: &[u8]) -> String {
    let mut out = format!(
        "{}{{\r\n{}ID: {} type: Resource Value\n{}{{\n{}data ({} bytes):\r\n",
        indent(level),
        indent(level + 1),
        id,
        indent(level + 1),
        indent(level + 2),
        bytes.len()
    );
    out.push_str(&dump(bytes, level + 2));
    out.push_str(&format!("{}}}\r\n{}}}\r\n", indent(level + 1), indent(level)));
    out
}

fn tlv_resources(level: usize, resources: &[(u16, Res)]) -> String {
    let mut out = String::new();
    for (id, res) in resources {
        match res {
            Res::Str(s) => out.push_str(&tlv_value(level, *id, s.as_bytes())),
            Res::Int(i) => out.push_str(&tlv_value(level, *id, &int_bytes(*i))),
            Res::Bool(b) => out.push_str(&tlv_value(level, *id, &[*b as u8])),
            Res::Multi(values) => {
                out.push_str(&format!(
                    "{}{{\r\n{}ID: {} type: Multiple Instances\n{}{{\n",
                    indent(level),
                    indent(level + 1),
                    id,
                    indent(level + 1)
                ));
                for (i, v) in values.iter().enumerate() {
                    out.push_str(&tlv_value(level + 1, i as u16, &int_bytes(*v)));
                }
                out.push_str(&format!("{}}}\r\n{}}}\r\n", indent(level + 1), indent(level)));
            }
        }
    }
    out
}

fn tlv(target: &Target) -> String {
    match target {
        Target::Object(resources) => format!(
            "{}{{\r\n{}ID: 0 type: Object Instance\n{}{{\n{}{}}}\r\n{}}}\r\n",
            indent(1),
            indent(2),
            indent(2),
            tlv_resources(2, resources),
            indent(2),
            indent(1)
        ),
        Target::Instance(resources) => tlv_resources(1, resources),
        Target::Resource(id, res) => tlv_resources(1, &[(*id, res.clone())]),
    }
}

/// Encoded size of one TLV record carrying `len` bytes
fn tlv_record_size(id: u16, len: usize) -> usize {
    let id_bytes = if id > 0xFF { 2 } else { 1 };
    let len_bytes = match len {
        0..=7 => 0,
        8..=0xFF => 1,
        0x100..=0xFFFF => 2,
        _ => 3,
    };
    1 + id_bytes + len_bytes + len
}

fn resources_size(resources: &[(u16, Res)]) -> usize {
    resources
        .iter()
        .map(|(id, res)| match res {
            Res::Str(s) => tlv_record_size(*id, s.len()),
            Res::Int(i) => tlv_record_size(*id, int_bytes(*i).len()),
            Res::Bool(_) => tlv_record_size(*id, 1),
            Res::Multi(values) => {
                let inner = values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| tlv_record_size(i as u16, int_bytes(*v).len()))
                    .sum();
                tlv_record_size(*id, inner)
            }
        })
        .sum()
}

fn tlv_size(target: &Target) -> usize {
    match target {
        Target::Object(resources) => tlv_record_size(0, resources_size(resources)),
        Target::Instance(resources) => resources_size(resources),
        Target::Resource(id, res) => resources_size(&[(*id, res.clone())]),
    }
}

fn text_bytes(target: &Target) -> Option<Vec<u8>> {
    match target {
        Target::Resource(_, Res::Str(s)) => Some(s.as_bytes().to_vec()),
        Target::Resource(_, Res::Int(i)) => Some(i.to_string().into_bytes()),
        Target::Resource(_, Res::Bool(b)) => Some(if *b { b"1".to_vec() } else { b"0".to_vec() }),
        _ => None,
    }
}

/// The `output_data` block for a payload
fn output_data(format: &str, path: &str, target: &Target) -> String {
    let (mime, len, body) = match format {
        "tlv" => {
            let body = tlv(target);
            ("application/vnd.oma.lwm2m+tlv", tlv_size(target), body)
        }
        "json" => {
            let payload = lwm2m_json(path, target);
            ("application/vnd.oma.lwm2m+json", payload.len(), format!("{}{}\n", indent(1), payload))
        }
        "text" => match text_bytes(target) {
            Some(bytes) => ("text/plain", bytes.len(), dump(&bytes, 1)),
            None => {
                let payload = senml(path, target);
                ("application/senml+json", payload.len(), format!("{}{}\n", indent(1), payload))
            }
        },
        _ => {
            let payload = senml(path, target);
            ("application/senml+json", payload.len(), format!("{}{}\n", indent(1), payload))
        }
    };
    format!(
        "{}non block transfer\n\r{}{} bytes received of type {}:\r\n{}",
        indent(1),
        indent(1),
        len,
        mime,
        body
    )
}

/// The transport layer's packet printout
fn packet_header() -> String {
    let header = [0x64u8, 0x45, 0x12, 0x34, 0xAB, 0xCD, 0xEF, 0x01];
    format!(
        "{} bytes received from [127.0.0.1]:56830\r\n{}",
        header.len(),
        dump(&header, 0)
    )
}

// === Server ===

struct Observation {
    client: u32,
    path: String,
    count: u32,
    next: Instant,
}

struct ServerState {
    name: String,
    observations: Vec<Observation>,
    notify_every: Duration,
}

fn registration_block(name: &str, header: &str) -> String {
    format!(
        "{}\r\n{}\r\nClient #0:\r\n\tname: \"{}\"\r\n\tversion: \"1.1\"\r\n\tbinding: \"UDP\"\r\n\
         \tlifetime: 300 sec\r\n\tobjects: /1 (1.1), /1/0, /2/0, /3/0, /4/0, /5/0, /6/0, /7/0, \
         /31024 (1.0), /31024/10, /31024/11, /31024/12, \r\n{}",
        packet_header(),
        header,
        name,
        PROMPT
    )
}

fn notify_block(observation: &Observation) -> String {
    let body = resolve(&observation.path)
        .map(|target| output_data("senml", &observation.path, &target))
        .unwrap_or_default();
    format!(
        "{}\r\nNotify from client #{} {} number {}\r\n{}{}",
        packet_header(),
        observation.client,
        observation.path,
        observation.count,
        body,
        PROMPT
    )
}

fn result_block(client: &str, path: &str, status: &str) -> String {
    format!(
        "{}\r\nClient #{} {} : {}\r\n{}",
        packet_header(),
        client,
        path,
        status,
        PROMPT
    )
}

fn server_command(state: &Arc<Mutex<ServerState>>, line: &str) -> bool {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&command, args)) = words.split_first() else {
        emit(PROMPT);
        return true;
    };

    match (command, args) {
        ("q", []) => return false,
        ("help", _) => emit(&format!(
            "help\tType 'help [COMMAND]' for more details on a command.\r\n\
             list\tList registered clients.\r\n\
             read\tRead from a client.\r\n\
             write\tWrite to a client.\r\n\
             time\tWrite time-related attributes to a client.\r\n\
             observe\tObserve from a client.\r\n\
             cancel\tCancel an observe.\r\n\
             q\tQuit the server.\r\n{}",
            PROMPT
        )),
        ("list", []) => {
            let name = lock(state).name.clone();
            let block = registration_block(&name, "");
            // Only the client dump, without packet and header
            let dump_start = block.find("Client #0:").unwrap_or(0);
            emit(&block[dump_start..]);
        }
        ("read", [client, path, rest @ ..]) if rest.len() <= 1 => {
            emit(&format!("OK{}", PROMPT));
            thread::sleep(Duration::from_millis(20));
            match resolve(path) {
                Some(target) => {
                    let format = rest.first().copied().unwrap_or("senml");
                    emit(&format!(
                        "{}\r\nClient #{} {} : COAP_205_CONTENT\r\n{}{}",
                        packet_header(),
                        client,
                        path,
                        output_data(format, path, &target),
                        PROMPT
                    ));
                }
                None => emit(&result_block(client, path, "COAP_404_NOT_FOUND")),
            }
        }
        ("write", [client, path, _value]) | ("time", [client, path, _value, _]) => {
            emit(&format!("OK{}", PROMPT));
            thread::sleep(Duration::from_millis(20));
            emit(&result_block(client, path, "COAP_204_CHANGED"));
        }
        ("observe", [client, path]) => {
            let Ok(client) = client.parse::<u32>() else {
                emit(&format!("Syntax error !{}", PROMPT));
                return true;
            };
            emit(&format!("OK{}", PROMPT));
            thread::sleep(Duration::from_millis(20));
            let mut guard = lock(state);
            let observation = Observation {
                client,
                path: path.to_string(),
                count: 0,
                next: Instant::now() + guard.notify_every,
            };
            emit(&notify_block(&observation));
            guard.observations.push(Observation {
                count: 1,
                ..observation
            });
        }
        ("cancel", [client, path]) => {
            // Notifies are emitted under the lock, so none can follow the OK
            lock(state).observations.retain(|o| o.path != *path);
            emit(&format!("OK{}", PROMPT));
            thread::sleep(Duration::from_millis(20));
            emit(&result_block(client, path, "COAP_205_CONTENT"));
        }
        ("read" | "write" | "time" | "observe" | "cancel", _) => {
            emit(&format!("Syntax error !{}", PROMPT))
        }
        _ => emit(&format!("Unknown command. Type 'help' for help.\r\n{}", PROMPT)),
    }
    true
}

fn lock(state: &Arc<Mutex<ServerState>>) -> std::sync::MutexGuard<'_, ServerState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn server_ticker(state: Arc<Mutex<ServerState>>, args: &Args) {
    let start = Instant::now();
    let register_at = args.register_after_ms.map(|ms| start + Duration::from_millis(ms));
    let update_every = args.update_every_ms.map(Duration::from_millis);
    let mut registered = false;
    let mut next_update = None;

    loop {
        thread::sleep(Duration::from_millis(10));
        let now = Instant::now();
        let mut guard = lock(&state);

        if let Some(at) = register_at {
            if !registered && now >= at {
                emit(&registration_block(&guard.name, "New client #0 registered."));
                registered = true;
                next_update = update_every.map(|every| now + every);
            }
        }

        if let (Some(at), Some(every)) = (next_update, update_every) {
            if now >= at {
                emit(&registration_block(&guard.name, "Client #0 updated."));
                next_update = Some(now + every);
            }
        }

        let every = guard.notify_every;
        for observation in guard.observations.iter_mut() {
            if now >= observation.next {
                emit(&notify_block(observation));
                observation.count += 1;
                observation.next = now + every;
            }
        }
    }
}

fn run_server(args: Args) {
    let state = Arc::new(Mutex::new(ServerState {
        name: args.name.clone(),
        observations: Vec::new(),
        notify_every: Duration::from_millis(args.notify_every_ms),
    }));

    emit("> ");
    let ticker_state = Arc::clone(&state);
    thread::spawn(move || server_ticker(ticker_state, &args));

    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        if !server_command(&state, line.trim()) {
            break;
        }
    }
}

// === Client ===

fn run_client(args: Args) {
    emit(" -> State: STATE_INITIAL\r\n");
    thread::sleep(Duration::from_millis(50));
    if args.bootstrap {
        emit(" -> State: STATE_BOOTSTRAPPING\r\n");
        thread::sleep(Duration::from_millis(50));
        emit(&packet_header());
    } else {
        emit(" -> State: STATE_REGISTERING\r\n");
        thread::sleep(Duration::from_millis(50));
        emit(&packet_header());
        emit(" -> State: STATE_READY\r\n");
    }
    emit("> ");

    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        match line.trim() {
            "quit" => break,
            "" => emit("> "),
            "help" => emit(&format!(
                "help\tType 'help [COMMAND]' for more details on a command.\r\n\
                 quit\tQuit the client gracefully.\r\n{}",
                PROMPT
            )),
            _ => emit(&format!("Unknown command. Type 'help' for help.\r\n{}", PROMPT)),
        }
    }
}

// === Bootstrap server ===

fn bootstrap_exchange(name: &str) {
    let steps = [
        format!("\r\nBootstrap request from \"{}\"\r\n", name),
        format!("Sending DELETE /0 to \"{}\" OK.\r\n", name),
        format!("\r\n Received status 2.02 (COAP_202_DELETED) for URI /0 from endpoint {}.\r\n", name),
        format!("Sending DELETE /1 to \"{}\" OK.\r\n", name),
        format!("\r\n Received status 2.02 (COAP_202_DELETED) for URI /1 from endpoint {}.\r\n", name),
        format!("Sending WRITE /0/1 to \"{}\" OK.\r\n", name),
        format!("\r\n Received status 2.04 (COAP_204_CHANGED) for URI /0/1 from endpoint {}.\r\n", name),
        format!("Sending WRITE /1/1 to \"{}\" OK.\r\n", name),
        format!("\r\n Received status 2.04 (COAP_204_CHANGED) for URI /1/1 from endpoint {}.\r\n", name),
        format!("Sending DISCOVER / to \"{}\" OK.\r\n", name),
        format!("\r\n Received status 2.05 (COAP_205_CONTENT) for URI / from endpoint {}.\r\n", name),
        format!("Sending BOOTSTRAP FINISH  to \"{}\" OK.\r\n", name),
        format!("\r\n Received status 2.04 (COAP_204_CHANGED) for URI / from endpoint {}.\r\n", name),
    ];
    for step in &steps {
        emit(&format!("{}{}", packet_header(), step));
        thread::sleep(Duration::from_millis(10));
    }
    emit(PROMPT);
}

fn run_bootstrap_server(args: Args) {
    emit("> ");
    if let Some(ms) = args.bootstrap_after_ms {
        let name = args.name.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(ms));
            bootstrap_exchange(&name);
        });
    }

    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        match line.trim() {
            "q" => break,
            "" => emit("> "),
            "help" => emit(&format!(
                "help\tType 'help [COMMAND]' for more details on a command.\r\n\
                 q\tQuit the server.\r\n{}",
                PROMPT
            )),
            _ => emit(&format!("Unknown command. Type 'help' for help.\r\n{}", PROMPT)),
        }
    }
}

fn main() {
    let args = Args::parse();

    if let Some(ms) = args.exit_after_ms {
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(ms));
            std::process::exit(0);
        });
    }

    match args.role {
        MockRole::Server => run_server(args),
        MockRole::Client => run_client(args),
        MockRole::BootstrapServer => run_bootstrap_server(args),
    }
}
