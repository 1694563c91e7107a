//! Banking customer-support responders

use super::{LlmResponder, PromptContext, RegistryError, Responder, ResponderRegistry};
use crate::llm::LlmService;
use std::sync::Arc;

pub const ACCOUNT_AGENT: &str = "AccountAgent";
pub const TRANSACTION_HISTORY_AGENT: &str = "TransactionHistoryAgent";
pub const PAYMENT_AGENT: &str = "PaymentAgent";

const ACCOUNT_DESCRIPTION: &str =
    "Account information: balance, payment methods, cards and the beneficiaries book.";
const TRANSACTION_DESCRIPTION: &str = "Banking movements and the history of past payments.";
const PAYMENT_DESCRIPTION: &str =
    "Starting a payment, paying an uploaded bill or invoice, or managing an on-going payment.";

const ACCOUNT_INSTRUCTIONS: &str = r"You are a personal financial advisor who helps the user retrieve information about their bank account.
Answer questions about account balance, registered payment methods, cards and the beneficiaries book.
Never guess account identifiers; always look them up for the logged user.
Use HTML lists or tables to display account details, payment methods or beneficiaries.
Logged user:
{user_mail}
Current timestamp:
{current_date_time}";

const TRANSACTION_INSTRUCTIONS: &str = r"You are a personal financial advisor who helps the user review their banking movements and payment history.
When the user asks about a payee or a period, filter the movements accordingly and summarize totals when useful.
Never guess account identifiers; always look them up for the logged user.
Use HTML lists or tables to display movements and payments.
Logged user:
{user_mail}
Current timestamp:
{current_date_time}";

const PAYMENT_INSTRUCTIONS: &str = r"You are a personal financial advisor who helps the user with their recurrent bill payments. The user may want to pay a bill by uploading a photo of it, or start the payment by checking the transaction history for a specific payee.
To pay a bill you need: the bill id or invoice number, the payee name and the total amount.
If information is missing, ask the user for it.
If the user submits a photo, always ask them to confirm the data extracted from it.
Always check the payment history to see whether the bill was already paid before proposing to pay it.
Ask which payment method to use among those available on the user account.
For bank transfers, check whether the payee is in the registered beneficiaries list; if not, ask for the payee bank code.
Check that the selected payment method has enough funds for the bill. Do not use the account balance to evaluate funds.
Before submitting the payment, ask the user to confirm the payment details.
Include the invoice or bill id in the payment description, for example: payment for invoice 1527248.
Never guess accountId or paymentMethodId from the conversation; always retrieve them.
If the payment succeeds, give the user the confirmation; otherwise give them the error message.
Use HTML lists or tables to display bill data, payments, account or transaction details.
Logged user:
{user_mail}
Current timestamp:
{current_date_time}";

/// Build the account, transaction-history and payment responders.
///
/// The payment responder is request scoped: a fresh instance serves
/// every turn routed to it.
pub fn registry(
    llm: Arc<dyn LlmService>,
    context: &PromptContext,
) -> Result<ResponderRegistry, RegistryError> {
    let account = LlmResponder::new(
        ACCOUNT_AGENT,
        ACCOUNT_DESCRIPTION,
        ACCOUNT_INSTRUCTIONS,
        Arc::clone(&llm),
    )
    .with_context(context.clone());
    let transactions = LlmResponder::new(
        TRANSACTION_HISTORY_AGENT,
        TRANSACTION_DESCRIPTION,
        TRANSACTION_INSTRUCTIONS,
        Arc::clone(&llm),
    )
    .with_context(context.clone());

    let payment_context = context.clone();
    ResponderRegistry::builder()
        .shared(Arc::new(account))
        .shared(Arc::new(transactions))
        .scoped(PAYMENT_AGENT, PAYMENT_DESCRIPTION, move || {
            Arc::new(
                LlmResponder::new(
                    PAYMENT_AGENT,
                    PAYMENT_DESCRIPTION,
                    PAYMENT_INSTRUCTIONS,
                    Arc::clone(&llm),
                )
                .with_context(payment_context.clone()),
            ) as Arc<dyn Responder>
        })
        .build()
}
