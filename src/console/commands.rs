//! Console command parsing and execution

use std::net::{IpAddr, SocketAddr};

use crate::registry::MIN_PING_INTERVAL_MS;
use crate::scheduler::Mode;
use crate::server::BalancerState;
use crate::stats::{format_assignments, format_live, format_servers, server_rows};

/// One operator command, fully parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Servers,
    Live,
    Clients,
    Status,
    Drain(Target),
    Undrain(Target),
    Drained,
    SetWeight(SocketAddr, u32),
    Weights,
    ModeDefault(Mode),
    SetPing(u64),
    /// `None` removes the cap.
    SetMaxConn(Option<u64>),
    Ban(BanTarget),
    Unban(BanTarget),
    Bans,
    Remove(SocketAddr),
    Clear,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    All,
    One(SocketAddr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanTarget {
    Ip(IpAddr),
    Name(String),
}

const HELP: &str = "commands:
  servers                      list backends (RTT, weight, drain, live, assigned)
  live                         reported live clients per backend
  clients | recent             recent assignments
  status                       servers + live
  drain <host:port> | all      exclude backend(s) from selection
  undrain <host:port> | all    re-admit backend(s)
  drained                      list drained backends
  setweight <host:port> <N>    set round-robin weight (min 1)
  weights                      list weights
  mode default static|dynamic  change the default selection mode
  set ping <ms>                probe interval (min 200)
  set maxconn <N>|unlimited    per-backend live-client cap
  ban ip <addr> | ban name <x> refuse a client by source IP or name
  unban ip <addr> | unban name <x>
  bans                         list ban sets
  remove <host:port>           drop a backend from the registry
  clear                        empty the assignment log
  help                         this summary";

impl Command {
    /// Parse one console line. `Ok(None)` is a blank line; `Err` carries the
    /// usage hint to print.
    pub fn parse(line: &str) -> Result<Option<Command>, String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&verb) = tokens.first() else {
            return Ok(None);
        };

        let cmd = match verb {
            "servers" => Command::Servers,
            "live" => Command::Live,
            "clients" | "recent" => Command::Clients,
            "status" => Command::Status,
            "drained" => Command::Drained,
            "weights" => Command::Weights,
            "bans" => Command::Bans,
            "clear" => Command::Clear,
            "help" => Command::Help,
            "drain" => Command::Drain(parse_target(&tokens, "drain")?),
            "undrain" => Command::Undrain(parse_target(&tokens, "undrain")?),
            "setweight" => {
                let backend = parse_backend(tokens.get(1), "setweight <host:port> <N>")?;
                let weight = tokens
                    .get(2)
                    .and_then(|t| t.parse::<u32>().ok())
                    .ok_or("usage: setweight <host:port> <N>")?;
                Command::SetWeight(backend, weight)
            }
            "mode" => {
                if tokens.get(1).copied() != Some("default") {
                    return Err("usage: mode default <static|dynamic>".to_string());
                }
                let mode = tokens
                    .get(2)
                    .and_then(|t| t.parse::<Mode>().ok())
                    .ok_or("usage: mode default <static|dynamic>")?;
                Command::ModeDefault(mode)
            }
            "set" => match tokens.get(1).copied() {
                Some("ping") => {
                    let ms = tokens
                        .get(2)
                        .and_then(|t| t.parse::<u64>().ok())
                        .ok_or("usage: set ping <ms>")?;
                    Command::SetPing(ms)
                }
                Some("maxconn") => match tokens.get(2).copied() {
                    Some("unlimited") => Command::SetMaxConn(None),
                    Some(n) => {
                        let n = n
                            .parse::<u64>()
                            .map_err(|_| "usage: set maxconn <N>|unlimited")?;
                        Command::SetMaxConn(Some(n))
                    }
                    None => return Err("usage: set maxconn <N>|unlimited".to_string()),
                },
                _ => return Err("usage: set ping <ms> | set maxconn <N>".to_string()),
            },
            "ban" => Command::Ban(parse_ban_target(&tokens, "ban")?),
            "unban" => Command::Unban(parse_ban_target(&tokens, "unban")?),
            "remove" => Command::Remove(parse_backend(tokens.get(1), "remove <host:port>")?),
            other => {
                return Err(format!("unknown command {:?}; try 'help'", other));
            }
        };
        Ok(Some(cmd))
    }
}

fn parse_backend(token: Option<&&str>, usage: &str) -> Result<SocketAddr, String> {
    let token = token.ok_or_else(|| format!("usage: {}", usage))?;
    token
        .parse::<SocketAddr>()
        .map_err(|_| format!("{:?} is not host:port (usage: {})", token, usage))
}

fn parse_target(tokens: &[&str], verb: &str) -> Result<Target, String> {
    match tokens.get(1).copied() {
        Some("all") => Ok(Target::All),
        Some(_) => Ok(Target::One(parse_backend(
            tokens.get(1),
            &format!("{} <host:port>|all", verb),
        )?)),
        None => Err(format!("usage: {} <host:port>|all", verb)),
    }
}

fn parse_ban_target(tokens: &[&str], verb: &str) -> Result<BanTarget, String> {
    match (tokens.get(1).copied(), tokens.get(2).copied()) {
        (Some("ip"), Some(ip)) => ip
            .parse::<IpAddr>()
            .map(BanTarget::Ip)
            .map_err(|_| format!("{:?} is not an IP address", ip)),
        (Some("name"), Some(name)) => Ok(BanTarget::Name(name.to_string())),
        _ => Err(format!("usage: {} ip <addr> | {} name <x>", verb, verb)),
    }
}

/// Apply a command to the running balancer and return the text to print.
pub fn execute(command: Command, state: &BalancerState) -> String {
    let format = state.console_format;
    match command {
        Command::Servers => {
            let snapshot = state.registry.snapshot();
            format_servers(&server_rows(&snapshot, &state.assignments), format)
        }
        Command::Live => format_live(&state.registry.snapshot(), format),
        Command::Clients => format_assignments(&state.assignments.recent(), format),
        Command::Status => {
            let snapshot = state.registry.snapshot();
            format!(
                "{}\n{}",
                format_servers(&server_rows(&snapshot, &state.assignments), format),
                format_live(&snapshot, format),
            )
        }
        Command::Drain(Target::All) => {
            state.registry.drain_all();
            "all backends drained".to_string()
        }
        Command::Drain(Target::One(backend)) => {
            if state.registry.drain(backend) {
                format!("drained {}", backend)
            } else {
                format!("no such backend: {}", backend)
            }
        }
        Command::Undrain(Target::All) => {
            state.registry.undrain_all();
            "all backends undrained".to_string()
        }
        Command::Undrain(Target::One(backend)) => {
            if state.registry.undrain(backend) {
                format!("undrained {}", backend)
            } else {
                format!("no such backend: {}", backend)
            }
        }
        Command::Drained => {
            let snapshot = state.registry.snapshot();
            let drained: Vec<String> = snapshot
                .entries
                .iter()
                .filter(|e| e.drained)
                .map(|e| e.backend.to_string())
                .collect();
            if drained.is_empty() {
                "no drained backends".to_string()
            } else {
                drained.join("\n")
            }
        }
        Command::SetWeight(backend, weight) => match state.registry.set_weight(backend, weight) {
            Some(applied) if applied != weight => {
                format!("weight of {} clamped to {}", backend, applied)
            }
            Some(applied) => format!("weight of {} set to {}", backend, applied),
            None => format!("no such backend: {}", backend),
        },
        Command::Weights => {
            let snapshot = state.registry.snapshot();
            if snapshot.entries.is_empty() {
                "no backends registered".to_string()
            } else {
                snapshot
                    .entries
                    .iter()
                    .map(|e| format!("{}  weight {}", e.backend, e.weight))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        Command::ModeDefault(mode) => {
            state.registry.set_default_mode(mode);
            format!("default mode set to {}", mode)
        }
        Command::SetPing(ms) => {
            let applied = state.registry.set_ping_interval(ms);
            if applied != ms {
                format!("ping interval clamped to {} ms", MIN_PING_INTERVAL_MS)
            } else {
                format!("ping interval set to {} ms", applied)
            }
        }
        Command::SetMaxConn(None) => {
            state.registry.set_max_per_backend(None);
            "per-backend cap removed".to_string()
        }
        Command::SetMaxConn(Some(n)) => {
            state.registry.set_max_per_backend(Some(n));
            format!("max clients per backend set to {}", n)
        }
        Command::Ban(BanTarget::Ip(ip)) => {
            if state.registry.ban_ip(ip) {
                format!("banned ip {}", ip)
            } else {
                format!("{} was already banned", ip)
            }
        }
        Command::Ban(BanTarget::Name(name)) => {
            if state.registry.ban_name(&name) {
                format!("banned name {}", name)
            } else {
                format!("{} was already banned", name)
            }
        }
        Command::Unban(BanTarget::Ip(ip)) => {
            if state.registry.unban_ip(ip) {
                format!("unbanned ip {}", ip)
            } else {
                format!("{} was not banned", ip)
            }
        }
        Command::Unban(BanTarget::Name(name)) => {
            if state.registry.unban_name(&name) {
                format!("unbanned name {}", name)
            } else {
                format!("{} was not banned", name)
            }
        }
        Command::Bans => {
            let (ips, names) = state.registry.bans();
            if ips.is_empty() && names.is_empty() {
                return "no bans".to_string();
            }
            let ips: Vec<String> = ips.iter().map(|ip| ip.to_string()).collect();
            format!(
                "banned ips: {}\nbanned names: {}",
                if ips.is_empty() { "-".to_string() } else { ips.join(", ") },
                if names.is_empty() { "-".to_string() } else { names.join(", ") },
            )
        }
        Command::Remove(backend) => {
            if state.registry.remove(backend) {
                format!("removed {}", backend)
            } else {
                format!("no such backend: {}", backend)
            }
        }
        Command::Clear => {
            state.assignments.clear();
            "assignment log cleared".to_string()
        }
        Command::Help => HELP.to_string(),
    }
}
