use super::socket::SocketId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    pub name: String,
    pub colors: i32,
    pub frags: i32,
    pub socket: Option<SocketId>,
}

/// What the running game exposes to the server info queries.
#[derive(Debug, Clone, Default)]
pub struct ServerStatus {
    pub active: bool,
    pub host_name: String,
    pub level_name: String,
    /// Active players, in slot order.
    pub players: Vec<PlayerRecord>,
    /// Server rules as `(name, value)`, in a fixed order.
    pub rules: Vec<(String, String)>,
}

impl ServerStatus {
    pub fn new(host_name: &str) -> Self {
        Self {
            host_name: host_name.to_string(),
            ..Default::default()
        }
    }

    pub fn set_rule(&mut self, name: &str, value: &str) {
        match self.rules.iter_mut().find(|(n, _)| n == name) {
            Some(rule) => rule.1 = value.to_string(),
            None => self.rules.push((name.to_string(), value.to_string())),
        }
    }

    /// Rule following `previous`; an empty `previous` starts the walk and an
    /// unknown one ends it.
    pub fn next_rule(&self, previous: &str) -> Option<&(String, String)> {
        if previous.is_empty() {
            return self.rules.first();
        }
        let index = self.rules.iter().position(|(name, _)| name == previous)?;
        self.rules.get(index + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_walk() {
        let mut status = ServerStatus::new("test");
        status.set_rule("deathmatch", "1");
        status.set_rule("fraglimit", "20");
        status.set_rule("deathmatch", "2");

        assert_eq!(status.rules.len(), 2);
        assert_eq!(
            status.next_rule(""),
            Some(&("deathmatch".to_string(), "2".to_string()))
        );
        assert_eq!(status.next_rule("deathmatch").unwrap().0, "fraglimit");
        assert_eq!(status.next_rule("fraglimit"), None);
        assert_eq!(status.next_rule("unknown"), None);
    }
}
