//! Tickets and invitation links
//!
//! A ticket is the registration's `ticket_code`; its QR code encodes the
//! public verification URL. Invitation links carry a signed token naming the
//! registration.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use qrcode::render::svg;
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::config::Settings;
use crate::utils::errors::{EventBuddyError, Result};

const INVITATION_PURPOSE: &str = "invitation";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvitationClaims {
    /// Registration id
    pub sub: i64,
    pub purpose: String,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TicketService {
    public_base_url: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TicketService {
    pub fn new(settings: &Settings) -> Self {
        let secret = settings.auth.jwt_secret.as_bytes();
        Self {
            public_base_url: settings.server.public_base_url.trim_end_matches('/').to_string(),
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// URL encoded into the QR code of a ticket
    pub fn verification_url(&self, ticket_code: Uuid) -> String {
        format!("{}/api/tickets/{}/verify", self.public_base_url, ticket_code)
    }

    /// QR code of a ticket as an SVG document
    pub fn qr_svg(&self, ticket_code: Uuid) -> Result<String> {
        let code = QrCode::new(self.verification_url(ticket_code).as_bytes())?;
        Ok(code
            .render::<svg::Color>()
            .min_dimensions(256, 256)
            .quiet_zone(true)
            .build())
    }

    /// Accept a bare ticket code or a full verification URL as scanned at the door
    pub fn parse_ticket_reference(&self, input: &str) -> Result<Uuid> {
        let input = input.trim();
        if let Ok(code) = Uuid::parse_str(input) {
            return Ok(code);
        }

        let url = Url::parse(input).map_err(|_| EventBuddyError::field("ticket", "Not a ticket code or ticket URL"))?;
        let segments: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();
        match segments.as_slice() {
            [.., "tickets", code, "verify"] => Uuid::parse_str(code)
                .map_err(|_| EventBuddyError::field("ticket", "Ticket code is malformed")),
            _ => Err(EventBuddyError::field("ticket", "Not a ticket code or ticket URL")),
        }
    }

    /// Signed invitation token valid until `expires_at`
    pub fn issue_invitation_token(&self, registration_id: i64, expires_at: DateTime<Utc>) -> Result<String> {
        let claims = InvitationClaims {
            sub: registration_id,
            purpose: INVITATION_PURPOSE.to_string(),
            exp: expires_at.timestamp(),
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?)
    }

    /// Registration id named by an invitation token
    pub fn verify_invitation_token(&self, token: &str) -> Result<i64> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = decode::<InvitationClaims>(token, &self.decoding_key, &validation)?;
        if data.claims.purpose != INVITATION_PURPOSE {
            return Err(EventBuddyError::Authentication("Token is not an invitation".to_string()));
        }
        Ok(data.claims.sub)
    }

    /// Link sent in invitation mails
    pub fn invitation_link(&self, token: &str) -> String {
        format!("{}/api/invitations/{}", self.public_base_url, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;

    fn service() -> TicketService {
        let mut settings = Settings::default();
        settings.auth.jwt_secret = "0123456789abcdef0123456789abcdef".to_string();
        settings.server.public_base_url = "https://events.example.org/".to_string();
        TicketService::new(&settings)
    }

    #[test]
    fn test_verification_url() {
        let code = Uuid::nil();
        assert_eq!(
            service().verification_url(code),
            "https://events.example.org/api/tickets/00000000-0000-0000-0000-000000000000/verify"
        );
    }

    #[test]
    fn test_qr_svg_is_svg() {
        let svg = service().qr_svg(Uuid::new_v4()).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("</svg>"));
    }

    #[test]
    fn test_parse_ticket_reference() {
        let service = service();
        let code = Uuid::new_v4();

        assert_eq!(service.parse_ticket_reference(&code.to_string()).unwrap(), code);
        assert_eq!(service.parse_ticket_reference(&service.verification_url(code)).unwrap(), code);
        assert!(service.parse_ticket_reference("https://events.example.org/api/events/1").is_err());
        assert!(service.parse_ticket_reference("hello").is_err());
    }

    #[test]
    fn test_invitation_token_round_trip() {
        let service = service();
        let token = service.issue_invitation_token(42, Utc::now() + Duration::days(1)).unwrap();
        assert_eq!(service.verify_invitation_token(&token).unwrap(), 42);
    }

    #[test]
    fn test_expired_invitation_token() {
        let service = service();
        let token = service.issue_invitation_token(42, Utc::now() - Duration::minutes(5)).unwrap();
        assert_matches!(service.verify_invitation_token(&token), Err(EventBuddyError::Token(_)));
    }

    #[test]
    fn test_token_with_other_purpose_is_rejected() {
        let service = service();
        let claims = InvitationClaims {
            sub: 42,
            purpose: "password_reset".to_string(),
            exp: (Utc::now() + Duration::days(1)).timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &service.encoding_key).unwrap();
        assert_matches!(service.verify_invitation_token(&token), Err(EventBuddyError::Authentication(_)));
    }
}
