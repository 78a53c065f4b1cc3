//! Controller implementation
//!
//! The SNES has two controller ports speaking a strobe-and-shift protocol
//! over $4016/$4017. Writing bit 0 of $4016 latches the button state into a
//! shift register on both pads; each read of the data register then shifts
//! one bit out, starting with B and ending with R, followed by all-ones
//! padding.

use serde::{Deserialize, Serialize};

/// The twelve buttons of a standard SNES pad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum Button {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
    X,
    Y,
    L,
    R,
    Start,
    Select,
}

impl Button {
    /// Bit position of the button in the serial report (B is shifted first)
    fn report_bit(self) -> u16 {
        match self {
            Button::B => 0,
            Button::Y => 1,
            Button::Select => 2,
            Button::Start => 3,
            Button::Up => 4,
            Button::Down => 5,
            Button::Left => 6,
            Button::Right => 7,
            Button::A => 8,
            Button::X => 9,
            Button::L => 10,
            Button::R => 11,
        }
    }
}

/// SNES controller
pub struct Controller {
    /// Current button state, one bit per button in report order
    button_state: u16,

    /// Shift register for serial reading
    shift_register: u16,

    /// Strobe flag
    strobe: bool,
}

impl Controller {
    /// Create a new controller with no buttons pressed
    pub fn new() -> Self {
        Controller {
            button_state: 0,
            shift_register: 0,
            strobe: false,
        }
    }

    /// Reset the controller
    pub fn reset(&mut self) {
        self.button_state = 0;
        self.shift_register = 0;
        self.strobe = false;
    }

    /// Set a button state
    pub fn set_button(&mut self, button: Button, pressed: bool) {
        let mask = 1 << button.report_bit();
        if pressed {
            self.button_state |= mask;
        } else {
            self.button_state &= !mask;
        }

        // When strobe is high, the shift register follows the buttons
        if self.strobe {
            self.shift_register = self.button_state;
        }
    }

    /// Write to the strobe line ($4016 bit 0)
    pub fn write_strobe(&mut self, value: u8) {
        let new_strobe = (value & 0x01) != 0;

        // Falling edge latches the buttons for serial readout
        if self.strobe && !new_strobe {
            self.shift_register = self.button_state;
        }

        self.strobe = new_strobe;
    }

    /// Read one bit from the data line ($4016/$4017 bit 0)
    pub fn read(&mut self) -> u8 {
        if self.strobe {
            // While strobed, reads keep returning the B button
            return (self.button_state & 0x01) as u8;
        }

        let result = (self.shift_register & 0x01) as u8;
        // Shift and feed ones so reads past the report return 1
        self.shift_register = (self.shift_register >> 1) | 0x8000;
        result
    }

    /// Raw button state, for save states
    pub fn button_state(&self) -> u16 {
        self.button_state
    }

    /// Serial shift state, for save states
    pub fn shift_state(&self) -> (u16, bool) {
        (self.shift_register, self.strobe)
    }

    /// Restore serial shift state from a save state
    pub fn restore_state(&mut self, buttons: u16, shift: u16, strobe: bool) {
        self.button_state = buttons;
        self.shift_register = shift;
        self.strobe = strobe;
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}
