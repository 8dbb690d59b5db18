//! Users and the login session.
//!
//! # Design
//! `User` wraps an `Entity` of kind `User` and derefs to it, so attribute
//! access and dirty tracking are shared. Login state lives in an explicit
//! `Session` owned by the caller rather than in process-wide state; logging
//! in hands the session token to the transport so later requests carry it.

use std::ops::{Deref, DerefMut};

use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use crate::entity::{Attributes, Entity, Kind};
use crate::http::HttpMethod;
use crate::transport::{Transport, LOGIN_PATH, STATUS_CREATED, STATUS_OK};
use crate::value::Value;

pub const USERNAME: &str = "username";
pub const PASSWORD: &str = "password";
pub const EMAIL: &str = "email";
pub const SESSION_TOKEN: &str = "sessionToken";

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    entity: Entity,
}

impl Default for User {
    fn default() -> Self {
        Self::new()
    }
}

impl User {
    pub fn new() -> Self {
        Self {
            entity: Entity::new(Kind::User),
        }
    }

    pub fn with_attributes(attributes: Attributes) -> Self {
        Self {
            entity: Entity::with_attributes(Kind::User, attributes),
        }
    }

    /// `Some` only for entities of the user kind.
    pub fn from_entity(entity: Entity) -> Option<Self> {
        (entity.kind() == &Kind::User).then_some(Self { entity })
    }

    pub fn into_entity(self) -> Entity {
        self.entity
    }

    pub fn username(&self) -> Option<&str> {
        self.entity.get_str(USERNAME)
    }

    pub fn set_username(&mut self, username: &str) {
        self.entity.set(USERNAME, username);
    }

    pub fn email(&self) -> Option<&str> {
        self.entity.get_str(EMAIL)
    }

    pub fn set_email(&mut self, email: &str) {
        self.entity.set(EMAIL, email);
    }

    pub fn set_password(&mut self, password: &str) {
        self.entity.set(PASSWORD, password);
    }

    pub fn session_token(&self) -> Option<&str> {
        self.entity.get_str(SESSION_TOKEN)
    }

    /// Register this user. `attributes` are merged in as trusted values first;
    /// a username and password are required. Succeeds on 201.
    pub fn sign_up(&mut self, attributes: Attributes, transport: &mut impl Transport) -> bool {
        let mut merged = self.entity.attributes().clone();
        merged.extend(attributes);
        self.entity.replace_attributes(merged);

        if self.username().is_none() || self.entity.get(PASSWORD).is_none() {
            debug!("sign up skipped: username and password are required");
            return false;
        }
        let payload = Json::Object(Entity::format_attributes_for_transfer(self.entity.attributes()));
        let created = transport.request(HttpMethod::Post, &Kind::User.path(None), Some(&payload));
        if !transport.outcome().is(STATUS_CREATED) {
            warn!(status = transport.status_code(), error = ?transport.error(), "sign up failed");
            return false;
        }
        self.absorb(created);
        true
    }

    /// Create and register a user in one call.
    pub fn sign_up_user(
        username: &str,
        password: &str,
        attributes: Attributes,
        transport: &mut impl Transport,
    ) -> Option<User> {
        let mut user = User::new();
        user.set_username(username);
        user.set_password(password);
        user.sign_up(attributes, transport).then_some(user)
    }

    /// Log in with the username and password currently set. On success the
    /// password is dropped, the session starts and the transport carries
    /// the new token.
    pub fn log_in(&mut self, session: &mut Session, transport: &mut impl Transport) -> bool {
        let (Some(username), Some(password)) = (
            self.username().map(str::to_string),
            self.entity.get_str(PASSWORD).map(str::to_string),
        ) else {
            return false;
        };
        let mut params = Map::new();
        params.insert(USERNAME.to_string(), Json::from(username));
        params.insert(PASSWORD.to_string(), Json::from(password));

        let logged_in = transport.request(HttpMethod::Get, LOGIN_PATH, Some(&Json::Object(params)));
        if !transport.outcome().is(STATUS_OK) {
            warn!(status = transport.status_code(), error = ?transport.error(), "log in failed");
            return false;
        }
        self.absorb(logged_in);
        self.entity.unset(PASSWORD);

        let token = self.session_token().map(str::to_string);
        transport.set_session_token(token.clone());
        session.begin(token, self.clone());
        true
    }

    /// True when `session`'s current user is this user.
    pub fn is_current(&self, session: &Session) -> bool {
        session.current_user().is_some_and(|current| current.same_as(self))
    }

    /// Current in `session` and holding a session token.
    pub fn authenticated(&self, session: &Session) -> bool {
        self.is_current(session) && self.session_token().is_some()
    }

    fn same_as(&self, other: &User) -> bool {
        match (self.entity.id(), other.entity.id()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    fn absorb(&mut self, response: Option<Json>) {
        let mut merged = self.entity.attributes().clone();
        if let Some(Json::Object(map)) = response {
            merged.extend(map.into_iter().map(|(k, v)| (k, Value::from_json(v))));
        }
        self.entity.clear_dirty();
        self.entity.replace_attributes(merged);
    }
}

impl Deref for User {
    type Target = Entity;

    fn deref(&self) -> &Entity {
        &self.entity
    }
}

impl DerefMut for User {
    fn deref_mut(&mut self) -> &mut Entity {
        &mut self.entity
    }
}

/// The active login: a session token and a snapshot of the logged-in user.
#[derive(Debug, Clone, Default)]
pub struct Session {
    token: Option<String>,
    current: Option<User>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, token: Option<String>, user: User) {
        self.token = token;
        self.current = Some(user);
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn current_user(&self) -> Option<&User> {
        self.current.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// End the session locally and stop sending its token. No request is made.
    pub fn log_out(&mut self, transport: &mut impl Transport) {
        transport.set_session_token(None);
        self.clear();
    }

    pub fn clear(&mut self) {
        self.token = None;
        self.current = None;
    }
}
