// storefront/src/services/notifier.rs

//! Order notifications.
//!
//! Emails are sent after an order is confirmed. Delivery is best effort: the
//! capture workflow logs a failed send and moves on.

use crate::config::SmtpConfig;
use crate::models::{Customer, Order, OrderLineItem, DEFAULT_VARIANT};
use askama::Template;
use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::{authentication::Credentials, Error as SmtpError};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Debug, Error)]
pub enum NotifyError {
  #[error("SMTP error: {0}")]
  Smtp(#[from] SmtpError),

  #[error("Failed to build message: {0}")]
  MessageBuild(#[from] lettre::error::Error),

  #[error("Invalid email address: {0}")]
  InvalidAddress(String),

  #[error("No recipient configured for {0}")]
  NoRecipient(&'static str),

  #[error("Template error: {0}")]
  Template(#[from] askama::Error),
}

#[async_trait]
pub trait Notifier: Send + Sync {
  /// Order confirmation to the buyer.
  async fn notify_buyer(&self, order: &Order, customer: &Customer) -> Result<(), NotifyError>;

  /// New-order notice to the shop operator.
  async fn notify_operator(&self, order: &Order, customer: &Customer) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
  pub subject: String,
  pub text: String,
  pub html: String,
}

struct EmailLine<'a> {
  title: &'a str,
  image: &'a str,
  quantity: i32,
  price: String,
  /// Color and size, leaving out the `default` placeholder.
  variants: Vec<String>,
}

impl<'a> EmailLine<'a> {
  fn from_item(item: &'a OrderLineItem) -> Self {
    let mut variants = Vec::new();
    if item.selected_color != DEFAULT_VARIANT {
      variants.push(format!("Color: {}", item.selected_color));
    }
    if item.selected_size != DEFAULT_VARIANT {
      variants.push(format!("Size: {}", item.selected_size));
    }
    Self {
      title: &item.title,
      image: item.image.as_deref().unwrap_or_default(),
      quantity: item.quantity,
      price: item.price.to_string(),
      variants,
    }
  }
}

/// Everything both order emails show.
struct OrderEmail<'a> {
  subject: String,
  name: &'a str,
  email: &'a str,
  phone: &'a str,
  shipping: String,
  notes: &'a str,
  items: Vec<EmailLine<'a>>,
  total: String,
  payment_method: &'a str,
  payment_status: String,
  order_status: String,
}

impl<'a> OrderEmail<'a> {
  fn new(subject: String, order: &'a Order, customer: &'a Customer) -> Self {
    let address = &order.address_info;
    let shipping = match address.postal_code.as_deref() {
      Some(code) => format!("{}, {}, {}", address.address, address.city, code),
      None => format!("{}, {}", address.address, address.city),
    };
    Self {
      subject,
      name: &customer.name,
      email: &customer.email,
      phone: &address.phone,
      shipping,
      notes: address.notes.as_deref().unwrap_or("N/A"),
      items: order.cart_items.iter().map(EmailLine::from_item).collect(),
      total: order.total_amount.to_string(),
      payment_method: &order.payment_method,
      payment_status: format!("{:?}", order.payment_status).to_uppercase(),
      order_status: format!("{:?}", order.order_status).to_uppercase(),
    }
  }
}

#[derive(Template)]
#[template(path = "email/order_confirmation.html")]
struct OrderConfirmationHtml<'a> {
  email: &'a OrderEmail<'a>,
}

#[derive(Template)]
#[template(path = "email/order_confirmation.txt")]
struct OrderConfirmationText<'a> {
  email: &'a OrderEmail<'a>,
}

#[derive(Template)]
#[template(path = "email/new_order.html")]
struct NewOrderHtml<'a> {
  email: &'a OrderEmail<'a>,
}

#[derive(Template)]
#[template(path = "email/new_order.txt")]
struct NewOrderText<'a> {
  email: &'a OrderEmail<'a>,
}

pub fn render_buyer_email(order: &Order, customer: &Customer) -> Result<RenderedEmail, NotifyError> {
  let email = OrderEmail::new(format!("Order Confirmation - #{}", order.id), order, customer);
  let html = OrderConfirmationHtml { email: &email }.render()?;
  let text = OrderConfirmationText { email: &email }.render()?;
  Ok(RenderedEmail {
    subject: email.subject,
    text,
    html,
  })
}

pub fn render_operator_email(order: &Order, customer: &Customer) -> Result<RenderedEmail, NotifyError> {
  let email = OrderEmail::new(format!("New Order Received - #{}", order.id), order, customer);
  let html = NewOrderHtml { email: &email }.render()?;
  let text = NewOrderText { email: &email }.render()?;
  Ok(RenderedEmail {
    subject: email.subject,
    text,
    html,
  })
}

/// Sends order emails over SMTP with STARTTLS.
#[derive(Clone)]
pub struct SmtpNotifier {
  mailer: AsyncSmtpTransport<Tokio1Executor>,
  from_address: String,
  shop_name: String,
  admin_email: Option<String>,
}

impl SmtpNotifier {
  pub fn new(config: &SmtpConfig, shop_name: &str, admin_email: Option<String>) -> Result<Self, NotifyError> {
    let credentials = Credentials::new(config.username.clone(), config.password.expose_secret().to_string());
    let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
      .port(config.port)
      .credentials(credentials)
      .build();

    Ok(Self {
      mailer,
      from_address: config.from_address.clone(),
      shop_name: shop_name.to_string(),
      admin_email,
    })
  }

  fn mailbox(&self, display_name: String) -> Result<Mailbox, NotifyError> {
    let address = self
      .from_address
      .parse()
      .map_err(|_| NotifyError::InvalidAddress(self.from_address.clone()))?;
    Ok(Mailbox::new(Some(display_name), address))
  }

  async fn send(&self, from: Mailbox, to: &str, email: RenderedEmail) -> Result<(), NotifyError> {
    let message = Message::builder()
      .from(from)
      .to(to.parse().map_err(|_| NotifyError::InvalidAddress(to.to_string()))?)
      .subject(email.subject.as_str())
      .multipart(
        MultiPart::alternative()
          .singlepart(SinglePart::builder().header(ContentType::TEXT_PLAIN).body(email.text))
          .singlepart(SinglePart::builder().header(ContentType::TEXT_HTML).body(email.html)),
      )?;

    self.mailer.send(message).await?;
    info!(to = %to, subject = %email.subject, "Email sent successfully");
    Ok(())
  }
}

#[async_trait]
impl Notifier for SmtpNotifier {
  #[instrument(name = "notify::buyer", skip_all, fields(order_id = %order.id))]
  async fn notify_buyer(&self, order: &Order, customer: &Customer) -> Result<(), NotifyError> {
    let from = self.mailbox(self.shop_name.clone())?;
    self.send(from, &customer.email, render_buyer_email(order, customer)?).await
  }

  #[instrument(name = "notify::operator", skip_all, fields(order_id = %order.id))]
  async fn notify_operator(&self, order: &Order, customer: &Customer) -> Result<(), NotifyError> {
    let to = self.admin_email.as_deref().ok_or(NotifyError::NoRecipient("operator"))?;
    let from = self.mailbox(format!("{} Admin", self.shop_name))?;
    self.send(from, to, render_operator_email(order, customer)?).await
  }
}

/// Logs notifications instead of sending them. Used when SMTP is not configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
  async fn notify_buyer(&self, order: &Order, customer: &Customer) -> Result<(), NotifyError> {
    let email = render_buyer_email(order, customer)?;
    info!(to = %customer.email, subject = %email.subject, "SMTP not configured; buyer email not sent.");
    Ok(())
  }

  async fn notify_operator(&self, order: &Order, customer: &Customer) -> Result<(), NotifyError> {
    let email = render_operator_email(order, customer)?;
    info!(subject = %email.subject, "SMTP not configured; operator email not sent.");
    Ok(())
  }
}
