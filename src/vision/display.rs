use opencv::{highgui, prelude::*};

use crate::error::Result;
use crate::overlay::{EventQueue, InputEvent};

/// A named highgui window.
pub struct Window {
    name: String,
}

impl Window {
    /// Keeps the frame's aspect ratio when the user resizes the window.
    pub fn new(name: &str) -> Result<Self> {
        highgui::named_window(name, highgui::WINDOW_KEEPRATIO)?;
        Ok(Self { name: name.into() })
    }

    pub fn show(&self, frame: &Mat) -> Result<()> {
        highgui::imshow(&self.name, frame)?;
        Ok(())
    }

    /// Wait up to `ms` milliseconds for a key; `-1` when none was pressed.
    pub fn wait_key(&self, ms: i32) -> Result<i32> {
        Ok(highgui::wait_key(ms)?)
    }

    /// Push double clicks and left-button press/release into `queue`.
    pub fn forward_mouse(&self, queue: EventQueue) -> Result<()> {
        highgui::set_mouse_callback(
            &self.name,
            Some(Box::new(move |event, x, y, _flags| {
                let event = match event {
                    highgui::EVENT_LBUTTONDBLCLK => InputEvent::PointClick(x, y),
                    highgui::EVENT_LBUTTONDOWN => InputEvent::DragStart(x, y),
                    highgui::EVENT_LBUTTONUP => InputEvent::DragEnd(x, y),
                    _ => return,
                };
                queue.push(event);
            })),
        )?;
        Ok(())
    }

    /// Push left-button presses into `queue` as clicks.
    pub fn forward_clicks(&self, queue: EventQueue) -> Result<()> {
        highgui::set_mouse_callback(
            &self.name,
            Some(Box::new(move |event, x, y, _flags| {
                if event == highgui::EVENT_LBUTTONDOWN {
                    queue.push(InputEvent::PointClick(x, y));
                }
            })),
        )?;
        Ok(())
    }

    pub fn add_trackbar(&self, name: &str, initial: i32, max: i32) -> Result<()> {
        highgui::create_trackbar(name, &self.name, None, max, None)?;
        highgui::set_trackbar_pos(name, &self.name, initial)?;
        Ok(())
    }

    pub fn trackbar(&self, name: &str) -> Result<i32> {
        Ok(highgui::get_trackbar_pos(name, &self.name)?)
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        let _ = highgui::destroy_window(&self.name);
    }
}
