//! `automate-chat`: start a new chat, send the input and open the reply

use std::time::Duration;

use async_trait::async_trait;

use crate::common::Result;
use crate::driver::operations::{self, StepOptions};
use crate::driver::Page;

use super::{Script, ScriptContext};

pub struct ChatScript;

#[async_trait]
impl Script for ChatScript {
    fn name(&self) -> &'static str {
        "automate-chat"
    }

    fn description(&self) -> &'static str {
        "Open a new chat, send the case input and wait for the assistant reply"
    }

    async fn run(&self, page: &mut dyn Page, ctx: &ScriptContext<'_>) -> Result<()> {
        let config = ctx.config;
        let elements = ctx.elements;
        let wait_after = config.step_interval();
        let short = StepOptions {
            timeout: Duration::from_millis(config.timeouts.short_ms),
            wait_after,
        };
        let default = StepOptions {
            timeout: Duration::from_millis(config.timeouts.default_ms),
            wait_after,
        };

        // Switch to solo mode only when the tab strip is in the shifted position
        let mode_tabs = elements.get("ModeTabContainer")?;
        let solo_button = elements.get("SwithToSoloButton")?;
        operations::conditional_click_by_transform(
            page,
            mode_tabs,
            solo_button,
            config.transform.check_value,
            "ModeTabContainer",
            short,
        )
        .await;

        operations::click_element(page, elements.get("NewChat")?, "NewChat", default).await?;

        let input = elements.get("NewTaskMessageInput")?;
        operations::click_element(page, input, "NewTaskMessageInput", default).await?;
        operations::fill_input(page, input, &ctx.case.input_text, "NewTaskMessageInput", default)
            .await?;

        operations::click_element(page, elements.get("SendButton")?, "SendButton", default)
            .await?;

        operations::wait_for_element(
            page,
            elements.get("LatestAssistantBar")?,
            "LatestAssistantBar",
            ctx.reply_timeout,
        )
        .await?;
        tokio::time::sleep(wait_after).await;

        operations::double_click_element(
            page,
            elements.get("FirstBotAvatar")?,
            "FirstBotAvatar",
            default,
        )
        .await
    }
}
